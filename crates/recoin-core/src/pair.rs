use serde::{Deserialize, Serialize};

use crate::errors::ChatError;
use crate::ids::UserId;

/// The two participants of a conversation.
///
/// Creation order is preserved (initiator first) because listings show
/// who reached out, but identity is unordered: `key()` folds both
/// orderings onto one canonical string so (A, B) and (B, A) address the
/// same thread.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantPair {
    initiator: UserId,
    peer: UserId,
}

impl ParticipantPair {
    pub fn new(initiator: UserId, peer: UserId) -> Result<Self, ChatError> {
        if initiator == peer {
            return Err(ChatError::Validation(
                "sender and receiver must be different users".into(),
            ));
        }
        Ok(Self { initiator, peer })
    }

    pub fn initiator(&self) -> &UserId {
        &self.initiator
    }

    pub fn peer(&self) -> &UserId {
        &self.peer
    }

    /// Canonical unordered encoding, lexicographic smaller id first.
    pub fn key(&self) -> String {
        let (lo, hi) = if self.initiator.as_str() <= self.peer.as_str() {
            (&self.initiator, &self.peer)
        } else {
            (&self.peer, &self.initiator)
        };
        format!("{}|{}", lo.as_str(), hi.as_str())
    }

    pub fn contains(&self, user: &UserId) -> bool {
        &self.initiator == user || &self.peer == user
    }

    /// The participant that is not `user`, if `user` is in the pair.
    pub fn other(&self, user: &UserId) -> Option<&UserId> {
        if user == &self.initiator {
            Some(&self.peer)
        } else if user == &self.peer {
            Some(&self.initiator)
        } else {
            None
        }
    }
}
