// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use http::StatusCode;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum ErrorCode {
    // Client-side errors (10000–10999)
    InvalidParameter = 10000,
    ValidationError = 10010,
    MissingConfiguration = 10020,

    // Resource and lifecycle errors (30000–30999)
    ResourceNotFound = 30000,
    InvalidStateTransition = 30010,
    NotPrepared = 30020,

    // Campaign execution errors (50000–50999)
    NoSendersAvailable = 50000,
    MailDisabled = 50010,
    TransportError = 50020,
    DailyLimitExceeded = 50030,
    CampaignCanceled = 50040,
    InternalBatchError = 50050,

    // Task queue errors (60000–60999)
    RedisConnectionFailed = 60000,
    RedisCommandFailed = 60010,

    // Internal system errors (70000–70999)
    InternalError = 70000,
    DecryptError = 70010,
}

impl ErrorCode {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidParameter
            | ErrorCode::ValidationError
            | ErrorCode::MissingConfiguration
            | ErrorCode::InvalidStateTransition
            | ErrorCode::NotPrepared => StatusCode::BAD_REQUEST,
            ErrorCode::ResourceNotFound => StatusCode::NOT_FOUND,
            ErrorCode::DailyLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::NoSendersAvailable
            | ErrorCode::MailDisabled
            | ErrorCode::TransportError
            | ErrorCode::CampaignCanceled
            | ErrorCode::InternalBatchError
            | ErrorCode::RedisConnectionFailed
            | ErrorCode::RedisCommandFailed
            | ErrorCode::InternalError
            | ErrorCode::DecryptError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
