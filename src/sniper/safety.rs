//! Mint-level safety checks
//!
//! Run before any scoring. An active freeze authority lets the creator freeze
//! buyer accounts, so the token is treated as a honeypot.

use serde::{Deserialize, Serialize};

use super::gate::RejectReason;
use crate::detector::{DetectionResult, TokenCandidate};

/// Authorities still held on the mint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MintPrivileges {
    pub mint_authority: Option<String>,
    pub freeze_authority: Option<String>,
}

impl MintPrivileges {
    pub fn from_candidate(candidate: &TokenCandidate) -> Self {
        Self {
            mint_authority: candidate.metadata.get("mintAuthority").cloned(),
            freeze_authority: candidate.metadata.get("freezeAuthority").cloned(),
        }
    }

    pub fn is_honeypot(&self) -> bool {
        self.freeze_authority.is_some()
    }

    pub fn can_mint(&self) -> bool {
        self.mint_authority.is_some()
    }

    pub fn renounced(&self) -> bool {
        self.mint_authority.is_none() && self.freeze_authority.is_none()
    }
}

/// First safety veto that applies, if any
pub fn check_safety(result: &DetectionResult, reject_mint_authority: bool) -> Option<RejectReason> {
    if let Some(failed) = result.failed_safety_checks().next() {
        return Some(RejectReason::FailedSafetyCheck(format!(
            "{}: {}",
            failed.check, failed.detail
        )));
    }

    let privileges = MintPrivileges::from_candidate(&result.candidate);
    if privileges.is_honeypot() {
        return Some(RejectReason::Honeypot);
    }
    if reject_mint_authority && privileges.can_mint() {
        return Some(RejectReason::MintAuthorityActive);
    }
    None
}
