pub mod validator;


pub use validator::{Assessment, RejectReason, SecondaryFix, SpoofingEvent, TelemetryValidator};
