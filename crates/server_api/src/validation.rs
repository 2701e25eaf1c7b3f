use shared::{
    domain::CaseStatus,
    error::{ApiError, FieldError},
};

pub const MAX_MESSAGE_CHARS: usize = 1000;
pub const MAX_TITLE_CHARS: usize = 255;
pub const MAX_DESCRIPTION_CHARS: usize = 1000;
pub const MAX_NAME_CHARS: usize = 100;

/// Collects field errors and turns them into one Validation failure.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn length(&mut self, path: &str, value: &str, min: usize, max: usize) -> &mut Self {
        let chars = value.trim().chars().count();
        if chars < min {
            self.errors
                .push(FieldError::new(path, format!("{path} must not be empty")));
        } else if value.chars().count() > max {
            self.errors.push(FieldError::new(
                path,
                format!("{path} must be at most {max} characters"),
            ));
        }
        self
    }

    pub fn optional_length(&mut self, path: &str, value: Option<&str>, max: usize) -> &mut Self {
        if let Some(value) = value {
            if value.chars().count() > max {
                self.errors.push(FieldError::new(
                    path,
                    format!("{path} must be at most {max} characters"),
                ));
            }
        }
        self
    }

    pub fn email(&mut self, path: &str, value: &str) -> &mut Self {
        if !looks_like_email(value) {
            self.errors
                .push(FieldError::new(path, "must be a valid email address"));
        }
        self
    }

    pub fn status(&mut self, path: &str, raw: &str) -> Option<CaseStatus> {
        let status = CaseStatus::parse(raw);
        if status.is_none() {
            let allowed = CaseStatus::ALL
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            self.errors.push(FieldError::new(
                path,
                format!("status must be one of: {allowed}"),
            ));
        }
        status
    }

    pub fn finish(&mut self) -> Result<(), ApiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::validation(std::mem::take(&mut self.errors)))
        }
    }
}

pub fn message_content(content: &str) -> Result<(), ApiError> {
    Validator::new()
        .length("content", content, 1, MAX_MESSAGE_CHARS)
        .finish()
}

fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !value.chars().any(char::is_whitespace)
}

#[cfg(test)]
#[path = "tests/validation_tests.rs"]
mod tests;
