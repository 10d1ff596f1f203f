//! Structured error codes carried by the `Error` server message.
//!
//! Codes serialize as `SCREAMING_SNAKE_CASE` strings (e.g. `"GAME_NOT_FOUND"`)
//! so clients can branch on them without parsing human-readable text.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured error codes reported to Gridlock clients.
///
/// Use [`description()`](ErrorCode::description) for a human-readable
/// explanation suitable for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Join errors
    GameNotFound,
    InvalidJoin,
    GameFull,
    GameEnded,
    NotInGame,

    // Placement errors
    GameNotStarted,
    PlacementClosed,
    InvalidFleet,
    InvalidPlacement,

    // Combat errors
    InvalidShot,
    WeaponsLocked,
    NoVetoesRemaining,
    VetoNotAvailable,
    VetoActive,

    // Verification errors
    VerificationRateLimited,
    SubmissionNotAccepted,
    HandleNotFound,
    VerificationUnavailable,

    // Server errors
    InternalError,
}

impl ErrorCode {
    /// Returns a human-readable description of this error code.
    pub fn description(&self) -> &'static str {
        match self {
            // Join errors
            Self::GameNotFound => {
                "The requested game could not be found. It may have ended or the identifier is wrong."
            }
            Self::InvalidJoin => {
                "The join request is malformed. A non-nil player identifier and a non-empty handle are required."
            }
            Self::GameFull => {
                "Both seats in this game are already taken."
            }
            Self::GameEnded => {
                "This game has already finished and no longer accepts joins or moves."
            }
            Self::NotInGame => {
                "You are not registered in this game. Send JoinGame before any other message."
            }

            // Placement errors
            Self::GameNotStarted => {
                "Combat has not started yet. Wait for both players to place their fleets."
            }
            Self::PlacementClosed => {
                "Ships can no longer be placed once combat has started."
            }
            Self::InvalidFleet => {
                "The fleet composition is wrong. Exactly five ships of sizes 5, 4, 3, 3 and 2 are required."
            }
            Self::InvalidPlacement => {
                "A ship is out of bounds or overlaps another ship."
            }

            // Combat errors
            Self::InvalidShot => {
                "The shot targets a cell outside the grid."
            }
            Self::WeaponsLocked => {
                "Your weapons are locked by heat. Solve a problem or spend a veto to unlock them."
            }
            Self::NoVetoesRemaining => {
                "You have spent every veto this game allows."
            }
            Self::VetoNotAvailable => {
                "A veto can only be used while your weapons are locked."
            }
            Self::VetoActive => {
                "A veto penalty timer is running. Wait for it to expire."
            }

            // Verification errors
            Self::VerificationRateLimited => {
                "Verification was requested too recently. Wait a few seconds before trying again."
            }
            Self::SubmissionNotAccepted => {
                "No accepted submission for that problem was found on your recent attempts."
            }
            Self::HandleNotFound => {
                "The judge does not know that handle. Check the spelling."
            }
            Self::VerificationUnavailable => {
                "The external judge could not be reached. Try again in a moment."
            }

            // Server errors
            Self::InternalError => {
                "An internal server error occurred. Please try again."
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}
