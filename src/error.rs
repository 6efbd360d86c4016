// ==================================================
// FILE: cellsim-rust/src/error.rs
// ==================================================

//! 边缘错误类型。注册表与演算器本身是全函数，错误只出现在配置、持久化与 FFI 边界。

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("unknown chemistry `{0}` (expected LFP or NMC)")]
    UnknownChemistry(String),

    #[error("invalid run configuration: {0}")]
    InvalidConfig(String),

    #[error("malformed CSV row at line {line}: {reason}")]
    MalformedRow { line: usize, reason: String },

    #[error("log writer is not running")]
    WriterClosed,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;
