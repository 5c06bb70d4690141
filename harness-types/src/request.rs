//! Driver request kinds.

use std::fmt;
use std::str::FromStr;

use crate::TypesError;

/// The closed set of operations the HTTP driver can perform.
///
/// Wire values keep the names existing test suites already send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Send one message to the test queue.
    SendMessage,
    /// Send one request message to the relay's inbound queue.
    SendRelayRequest,
    /// Send a transactional batch to the inbound queue; the relay will crash mid-way.
    SendRelayBatchAndKill,
    /// Receive one message from the test queue.
    ConsumeMessage,
    /// Receive one reply from the relay's outbound queue.
    ConsumeRelayReply,
    /// Drain the outbound queue and report how many replies it held.
    DrainRelayReplies,
}

impl RequestKind {
    /// Every request kind, in usage-listing order.
    pub const ALL: [RequestKind; 6] = [
        RequestKind::SendMessage,
        RequestKind::SendRelayRequest,
        RequestKind::SendRelayBatchAndKill,
        RequestKind::ConsumeMessage,
        RequestKind::ConsumeRelayReply,
        RequestKind::DrainRelayReplies,
    ];

    /// The `request` query parameter value for this kind.
    pub fn value(&self) -> &'static str {
        match self {
            RequestKind::SendMessage => "send-message",
            RequestKind::SendRelayRequest => "send-request-message-for-mdb",
            RequestKind::SendRelayBatchAndKill => "send-request-message-for-mdb-and-kill-server",
            RequestKind::ConsumeMessage => "consume-message",
            RequestKind::ConsumeRelayReply => "consume-reply-message-for-mdb",
            RequestKind::DrainRelayReplies => "consume-all-reply-messages-for-mdb",
        }
    }
}

impl FromStr for RequestKind {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.value() == s)
            .ok_or_else(|| TypesError::UnknownRequest(s.to_string()))
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value())
    }
}
