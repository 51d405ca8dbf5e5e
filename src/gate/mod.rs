//! Gates: step completion plus the approval and verification collaborators
//! it and the plan executor consult.

pub mod approval;
pub mod completion;
pub mod verify;

pub use approval::{ApprovalBoard, AutoApprove, PromptApproval};
pub use completion::{
    AutoCompleter, CheckResult, CompletionCheck, StageStep, StepCompletion, StepCompletionGate,
};
pub use verify::{HttpHealthVerifier, StaticVerifier};
