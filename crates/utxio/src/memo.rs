//! The subset of bridge memo formats this client acts on.

/// Memo attached to self-consolidation payments.
pub const CONSOLIDATE_MEMO: &str = "consolidate";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Memo {
    /// An outbound payment fulfilling the bridge transaction `txid`.
    Outbound { txid: String },
    /// A vault sweeping its own UTXOs back to itself.
    Consolidate,
    Other(String),
}

impl Memo {
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.splitn(2, ':');
        let kind = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or_default();

        if kind.eq_ignore_ascii_case("out") && !rest.is_empty() {
            return Memo::Outbound {
                txid: rest.to_owned(),
            };
        }
        if kind.eq_ignore_ascii_case("consolidate") {
            return Memo::Consolidate;
        }
        Memo::Other(raw.to_owned())
    }

    pub fn is_consolidate(&self) -> bool {
        matches!(self, Memo::Consolidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_outbound() {
        assert_eq!(
            Memo::parse("OUT:ABCDEF"),
            Memo::Outbound {
                txid: "ABCDEF".into()
            }
        );
        assert_eq!(
            Memo::parse("out:abcdef"),
            Memo::Outbound {
                txid: "abcdef".into()
            }
        );
        // an outbound memo without a txid is not actionable
        assert_eq!(Memo::parse("OUT:"), Memo::Other("OUT:".into()));
    }

    #[test]
    fn test_parse_consolidate() {
        assert!(Memo::parse("consolidate").is_consolidate());
        assert!(Memo::parse("CONSOLIDATE").is_consolidate());
    }

    #[test]
    fn test_parse_other() {
        assert_eq!(Memo::parse("ADD:ETH.ETH"), Memo::Other("ADD:ETH.ETH".into()));
        assert_eq!(Memo::parse(""), Memo::Other("".into()));
    }
}
