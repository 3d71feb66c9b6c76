// Copyright 2025 Streamstore Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(ThisError, Debug)]
pub enum Error {
    #[error("ConfigurationInvalid# {0}")]
    ConfigurationInvalid(String),
    #[error(
        "BlockTooLargeForCache# object {object_id} block size {block_size} exceeds cache size {cache_size}"
    )]
    BlockTooLargeForCache {
        object_id: i64,
        block_size: u64,
        cache_size: u64,
    },
    #[error("ReadFailure# {0}")]
    ReadFailure(String),
    #[error("WriteFailure# {0}")]
    WriteFailure(String),
    #[error("CommitFailure# {0}")]
    CommitFailure(String),
    #[error("SanityViolation# {0}")]
    SanityViolation(String),
    #[error("Cancelled")]
    Cancelled,
    #[error("Shutdown")]
    Shutdown,
    #[error("ObjectStoreError# {0}")]
    ObjectStoreError(#[from] object_store::Error),
    #[error("SerdeJsonError# {0}")]
    SerdeJsonError(#[from] serde_json::Error),
    #[error("Error# {0}")]
    Message(String),
}

impl Error {
    /// Force-split treats these as fatal for the whole run instead of
    /// skipping the current source object.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Cancelled | Error::Shutdown | Error::ConfigurationInvalid(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::BlockTooLargeForCache {
            object_id: 7,
            block_size: 2048,
            cache_size: 1024,
        };
        assert_eq!(
            e.to_string(),
            "BlockTooLargeForCache# object 7 block size 2048 exceeds cache size 1024"
        );
        assert!(Error::Cancelled.is_fatal());
        assert!(!Error::ReadFailure("eof".to_string()).is_fatal());
    }
}
