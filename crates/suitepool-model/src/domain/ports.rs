use serde::{Deserialize, Serialize};

/// Ports reserved for one slot: the primary port its server binds plus the
/// extra ports its suites asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBlock {
    pub primary: u16,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requested: Vec<u16>,
}

impl PortBlock {
    pub fn new(primary: u16, requested: Vec<u16>) -> Self {
        Self { primary, requested }
    }

    /// Every port in the block, primary first.
    pub fn ports(&self) -> impl Iterator<Item = u16> + '_ {
        std::iter::once(self.primary).chain(self.requested.iter().copied())
    }

    pub fn len(&self) -> usize {
        1 + self.requested.len()
    }

    /// Always `false`; a block has at least its primary port.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Comma-separated form used by `REQUESTED_PORTS`.
    pub fn requested_csv(&self) -> String {
        self.requested
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}
