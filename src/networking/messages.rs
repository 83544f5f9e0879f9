//! Exhaustive enumerations around every message variant exchanged between oracles.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    pacemaker::messages::PacemakerMessage,
    report_generation::messages::{
        Final, FinalEcho, Observe, ObserveReq, Report, ReportGenerationMessage, ReportReq,
    },
    types::data_types::Epoch,
};

/// All message variants exchanged between oracles.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub enum Message {
    /// See: [`PacemakerMessage`].
    PacemakerMessage(PacemakerMessage),

    /// See: [`ReportGenerationMessage`].
    ReportGenerationMessage(ReportGenerationMessage),
}

impl Message {
    /// Get the epoch the inner message refers to.
    pub fn epoch(&self) -> Epoch {
        match self {
            Message::PacemakerMessage(msg) => msg.epoch(),
            Message::ReportGenerationMessage(msg) => msg.epoch(),
        }
    }

    /// Get the PascalCase name of the inner message type, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Message::PacemakerMessage(PacemakerMessage::NewEpoch(_)) => "NewEpoch",
            Message::ReportGenerationMessage(msg) => match msg {
                ReportGenerationMessage::ObserveReq(_) => "ObserveReq",
                ReportGenerationMessage::Observe(_) => "Observe",
                ReportGenerationMessage::ReportReq(_) => "ReportReq",
                ReportGenerationMessage::Report(_) => "Report",
                ReportGenerationMessage::Final(_) => "Final",
                ReportGenerationMessage::FinalEcho(_) => "FinalEcho",
            },
        }
    }
}

impl From<PacemakerMessage> for Message {
    fn from(value: PacemakerMessage) -> Self {
        Message::PacemakerMessage(value)
    }
}

impl From<ReportGenerationMessage> for Message {
    fn from(value: ReportGenerationMessage) -> Self {
        Message::ReportGenerationMessage(value)
    }
}

impl From<ObserveReq> for Message {
    fn from(value: ObserveReq) -> Self {
        Message::ReportGenerationMessage(value.into())
    }
}

impl From<Observe> for Message {
    fn from(value: Observe) -> Self {
        Message::ReportGenerationMessage(value.into())
    }
}

impl From<ReportReq> for Message {
    fn from(value: ReportReq) -> Self {
        Message::ReportGenerationMessage(value.into())
    }
}

impl From<Report> for Message {
    fn from(value: Report) -> Self {
        Message::ReportGenerationMessage(value.into())
    }
}

impl From<Final> for Message {
    fn from(value: Final) -> Self {
        Message::ReportGenerationMessage(value.into())
    }
}

impl From<FinalEcho> for Message {
    fn from(value: FinalEcho) -> Self {
        Message::ReportGenerationMessage(value.into())
    }
}
