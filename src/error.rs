//! Error types for the Gridlock session server.

use thiserror::Error;

use crate::error_codes::ErrorCode;
use crate::protocol::GameId;

/// Errors produced by the session registry, the game core, and transports.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A join referenced a game identifier the registry does not know.
    #[error("unknown game: {0}")]
    UnknownGame(GameId),

    /// A join payload was malformed (nil player identifier or blank handle).
    #[error("invalid join: {0}")]
    InvalidJoin(String),

    /// A new player tried to join a game that already has both seats taken.
    #[error("game is full")]
    GameFull,

    /// The game has already finished; no further joins or moves are accepted.
    #[error("game has already ended")]
    GameEnded,

    /// The acting player is not registered in the referenced game.
    #[error("player is not in this game")]
    NotInGame,

    /// A combat action arrived before both players placed their fleets.
    #[error("game has not started yet")]
    GameNotStarted,

    /// Fleet placement arrived after combat started.
    #[error("cannot place ships after the game has started")]
    PlacementClosed,

    /// The submitted fleet does not match the required composition.
    #[error("invalid fleet: {0}")]
    InvalidFleet(String),

    /// A ship placement was out of bounds or overlapped another ship.
    #[error("invalid ship placement: {0}")]
    InvalidPlacement(&'static str),

    /// A shot targeted a cell outside the grid.
    #[error("shot out of bounds")]
    InvalidShot,

    /// The player's weapons are locked by heat; a solve or veto is required.
    #[error("weapons locked")]
    WeaponsLocked {
        /// Seconds left on an active veto timer, if one is running.
        veto_remaining_secs: Option<u64>,
    },

    /// The player has spent every veto the game configuration allows.
    #[error("no vetoes remaining")]
    NoVetoesRemaining,

    /// A veto was requested while weapons were not locked.
    #[error("cannot veto: weapons are not locked")]
    VetoNotAvailable,

    /// A solve was attempted while a veto penalty timer is running.
    #[error("cannot solve during an active veto penalty")]
    VetoActive,

    /// The player re-requested verification before the cooldown elapsed.
    #[error("verification attempted too soon, wait {retry_after_secs}s")]
    VerificationCooldown {
        /// Seconds until the next verification attempt is allowed.
        retry_after_secs: u64,
    },

    /// The external judge found no accepted submission for the problem.
    #[error("submission not accepted")]
    SubmissionNotAccepted,

    /// The external judge does not know the given handle.
    #[error("handle '{0}' not found")]
    HandleNotFound(String),

    /// The external judge could not be reached or returned garbage.
    #[error("verification unavailable: {0}")]
    VerificationUnavailable(String),

    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// The wire [`ErrorCode`] reported to clients for this error, if the
    /// error is one clients can act on. Transport and serialization failures
    /// return `None` — they surface as a close/error signal on the
    /// connection instead of an `Error` envelope.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::UnknownGame(_) => Some(ErrorCode::GameNotFound),
            Self::InvalidJoin(_) => Some(ErrorCode::InvalidJoin),
            Self::GameFull => Some(ErrorCode::GameFull),
            Self::GameEnded => Some(ErrorCode::GameEnded),
            Self::NotInGame => Some(ErrorCode::NotInGame),
            Self::GameNotStarted => Some(ErrorCode::GameNotStarted),
            Self::PlacementClosed => Some(ErrorCode::PlacementClosed),
            Self::InvalidFleet(_) => Some(ErrorCode::InvalidFleet),
            Self::InvalidPlacement(_) => Some(ErrorCode::InvalidPlacement),
            Self::InvalidShot => Some(ErrorCode::InvalidShot),
            Self::WeaponsLocked { .. } => Some(ErrorCode::WeaponsLocked),
            Self::NoVetoesRemaining => Some(ErrorCode::NoVetoesRemaining),
            Self::VetoNotAvailable => Some(ErrorCode::VetoNotAvailable),
            Self::VetoActive => Some(ErrorCode::VetoActive),
            Self::VerificationCooldown { .. } => Some(ErrorCode::VerificationRateLimited),
            Self::SubmissionNotAccepted => Some(ErrorCode::SubmissionNotAccepted),
            Self::HandleNotFound(_) => Some(ErrorCode::HandleNotFound),
            Self::VerificationUnavailable(_) => Some(ErrorCode::VerificationUnavailable),
            Self::TransportSend(_)
            | Self::TransportReceive(_)
            | Self::TransportClosed
            | Self::Serialization(_)
            | Self::Timeout
            | Self::Io(_) => None,
        }
    }
}

/// A specialized [`Result`] type for Gridlock session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
