//! Link-layer routing.

/// Link address pair identifying one logical session on a connection.
///
/// Addresses as carried by frames arriving from the master: `source` is the
/// master's (remote) address, `destination` the outstation's (local) one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Addresses {
    /// Remote link address
    pub source: u16,
    /// Local link address
    pub destination: u16,
}

impl Addresses {
    /// Create an address pair.
    #[inline]
    pub const fn new(source: u16, destination: u16) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// The same pair as seen from the other end.
    #[inline]
    pub const fn reverse(&self) -> Self {
        Self::new(self.destination, self.source)
    }
}

impl std::fmt::Display for Addresses {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.source, self.destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addresses_reverse() {
        let route = Addresses::new(1024, 1);
        assert_eq!(route.reverse(), Addresses::new(1, 1024));
        assert_eq!(route.reverse().reverse(), route);
        assert_eq!(route.to_string(), "1024 -> 1");
    }
}
