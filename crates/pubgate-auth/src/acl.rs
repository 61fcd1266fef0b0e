//! Topic pattern matching and grant precedence.

use crate::permission::Permission;

/// A topic pattern where `*` matches any (possibly empty) substring.
///
/// Every other character is literal and compared ignoring ASCII case, as SQLite `LIKE`
/// does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicPattern<'a>(&'a str);

impl<'a> TopicPattern<'a> {
    #[inline]
    pub fn new(pattern: &'a str) -> Self {
        Self(pattern)
    }

    #[inline]
    pub fn as_str(&self) -> &'a str {
        self.0
    }

    /// Whether the pattern contains a wildcard.
    #[inline]
    pub fn is_wildcard(&self) -> bool {
        self.0.contains('*')
    }

    /// Match `topic` against the pattern.
    pub fn matches(&self, topic: &str) -> bool {
        let p = self.0.as_bytes();
        let t = topic.as_bytes();
        let (mut pi, mut ti) = (0, 0);
        // Position of the last `*` seen and the topic index it was tried at.
        let mut star: Option<(usize, usize)> = None;

        while ti < t.len() {
            if pi < p.len() && p[pi] == b'*' {
                star = Some((pi, ti));
                pi += 1;
            } else if pi < p.len() && p[pi].eq_ignore_ascii_case(&t[ti]) {
                pi += 1;
                ti += 1;
            } else if let Some((spi, sti)) = star {
                pi = spi + 1;
                ti = sti + 1;
                star = Some((spi, sti + 1));
            } else {
                return false;
            }
        }
        p[pi..].iter().all(|&b| b == b'*')
    }
}

/// A grant loaded for resolution, tagged with the principal it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedGrant {
    /// `true` for grants of Everyone, `false` for the requesting principal's own.
    pub everyone: bool,
    pub topic_pattern: String,
    pub permission: Permission,
}

/// Pick the permission that applies to `topic`.
///
/// The principal's own grants take precedence over Everyone's. Among grants of the
/// same principal the smallest pattern in byte order wins. `None` means no grant
/// matched and the default applies.
pub fn resolve(grants: &[ScopedGrant], topic: &str) -> Option<Permission> {
    grants
        .iter()
        .filter(|g| TopicPattern::new(&g.topic_pattern).matches(topic))
        .min_by(|a, b| {
            a.everyone
                .cmp(&b.everyone)
                .then_with(|| a.topic_pattern.cmp(&b.topic_pattern))
        })
        .map(|g| g.permission)
}

/// Whether `granted` covers the `requested` operation.
///
/// A read-write request needs both bits; a deny-all request is never allowed.
#[inline]
pub fn allows(granted: Permission, requested: Permission) -> bool {
    match requested {
        Permission::Read => granted.is_read(),
        Permission::Write => granted.is_write(),
        Permission::ReadWrite => granted.is_read_write(),
        Permission::DenyAll => false,
    }
}
