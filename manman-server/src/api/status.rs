//! Core error -> gRPC status mapping.
//!
//! Internal details never leak verbatim: request-scoped kinds carry their
//! message (it was written for the caller), infrastructure kinds are
//! logged and replaced with a sanitized line.

use manman_core::{Error, ErrorKind};
use tonic::{Code, Status};

pub fn to_status(err: Error) -> Status {
    match err.kind {
        ErrorKind::Validation => Status::new(Code::InvalidArgument, err.message),
        ErrorKind::NotFound => Status::new(Code::NotFound, err.message),
        ErrorKind::AlreadyExists => Status::new(Code::AlreadyExists, err.message),
        ErrorKind::FailedPrecondition => Status::new(Code::FailedPrecondition, err.message),
        ErrorKind::Resource => Status::new(Code::ResourceExhausted, "resource exhausted"),
        ErrorKind::Transient => {
            tracing::warn!(target: "manman::api", error = %err, "transient failure surfaced to caller");
            Status::new(Code::Unavailable, "temporarily unavailable")
        }
        ErrorKind::Permanent | ErrorKind::Internal => {
            tracing::error!(target: "manman::api", error = %err, "internal failure");
            Status::new(Code::Internal, "internal error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_kinds_keep_their_message() {
        let status = to_status(Error::not_found("session 7"));
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(status.message(), "session 7");

        let status = to_status(Error::precondition("server offline"));
        assert_eq!(status.code(), Code::FailedPrecondition);
    }

    #[test]
    fn internal_details_are_sanitized() {
        let status = to_status(Error::internal("connection to 10.0.0.3 refused"));
        assert_eq!(status.code(), Code::Internal);
        assert!(!status.message().contains("10.0.0.3"));
    }
}
