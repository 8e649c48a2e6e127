use serde::Serialize;

/// Result of `record_view`. `charged = false` means the pair was already
/// paid for and no quota was consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ViewReceipt {
    pub charged: bool,
    pub remaining: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ViewGate {
    pub can_view: bool,
    pub remaining: i64,
}

impl ViewGate {
    pub fn closed() -> Self {
        Self {
            can_view: false,
            remaining: 0,
        }
    }
}
