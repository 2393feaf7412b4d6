//! Grade outcome types

use serde::{Deserialize, Serialize};

/// Final outcome of one executor run, persisted as the single status word
/// in `grade.vmr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    Done,
    Error,
}

impl Grade {
    /// Maps an executor exit code to a grade; only exit code 0 grades `done`.
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            Grade::Done
        } else {
            Grade::Error
        }
    }

    /// The literal word written to `grade.vmr`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::Done => "done",
            Grade::Error => "error",
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grade_from_exit_code() {
        assert_eq!(Grade::from_exit_code(0), Grade::Done);
        assert_eq!(Grade::from_exit_code(1), Grade::Error);
        assert_eq!(Grade::from_exit_code(-1), Grade::Error);
        assert_eq!(Grade::from_exit_code(124), Grade::Error);
    }

    #[test]
    fn test_grade_display() {
        assert_eq!(Grade::Done.to_string(), "done");
        assert_eq!(Grade::Error.to_string(), "error");
    }
}
