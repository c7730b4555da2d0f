// Copyright 2025 The Scheduled Scaling Operator Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use snafu::Snafu;
use strum::Display;

#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{} is required when schedule type is {}", field, schedule_type))]
    MissingField {
        field: &'static str,
        schedule_type: &'static str,
    },

    #[snafu(display("{} is invalid: {}", field, message))]
    BadFormat {
        field: &'static str,
        message: String,
    },

    #[snafu(display("{} {}", field, message))]
    OutOfRange {
        field: &'static str,
        message: String,
    },

    #[snafu(display("{} must be empty when schedule type is {}", field, schedule_type))]
    FieldConflict {
        field: &'static str,
        schedule_type: &'static str,
    },

    #[snafu(display(
        "unsupported schedule type '{}', must be one of: time, cron",
        schedule_type
    ))]
    UnknownType { schedule_type: String },
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum ErrorKind {
    MissingField,
    BadFormat,
    OutOfRange,
    FieldConflict,
    UnknownType,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingField { .. } => ErrorKind::MissingField,
            Error::BadFormat { .. } => ErrorKind::BadFormat,
            Error::OutOfRange { .. } => ErrorKind::OutOfRange,
            Error::FieldConflict { .. } => ErrorKind::FieldConflict,
            Error::UnknownType { .. } => ErrorKind::UnknownType,
        }
    }
}
