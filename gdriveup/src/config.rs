use std::env;

use crate::sync::engine::default_file_concurrency;

/// Runtime settings read from the environment (a `.env` file is loaded by the
/// binary before this runs).
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    /// OAuth access token; when absent the cached token from the index
    /// database is used instead.
    pub token: Option<String>,
    /// Overrides the default index database location.
    pub database_url: Option<String>,
    pub upload_concurrency: usize,
    pub file_concurrency: usize,
}

impl UploaderConfig {
    pub fn from_env() -> Self {
        Self {
            token: read_var("GDRIVE_TOKEN"),
            database_url: read_var("GDRIVEUP_DATABASE_URL"),
            upload_concurrency: read_limit("GDRIVEUP_UPLOAD_CONCURRENCY", 2),
            file_concurrency: read_limit(
                "GDRIVEUP_FILE_CONCURRENCY",
                default_file_concurrency(),
            ),
        }
    }
}

fn read_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn read_limit(name: &str, default: usize) -> usize {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse::<usize>() {
            Ok(value) if value > 0 => value,
            _ => {
                eprintln!("[gdriveup] warning: ignoring invalid {name}={raw}");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_limit_parses_positive_numbers() {
        unsafe { env::set_var("GDRIVEUP_TEST_LIMIT_OK", "7") };
        assert_eq!(read_limit("GDRIVEUP_TEST_LIMIT_OK", 2), 7);
        unsafe { env::remove_var("GDRIVEUP_TEST_LIMIT_OK") };
    }

    #[test]
    fn read_limit_falls_back_on_garbage_and_zero() {
        unsafe { env::set_var("GDRIVEUP_TEST_LIMIT_BAD", "many") };
        assert_eq!(read_limit("GDRIVEUP_TEST_LIMIT_BAD", 2), 2);
        unsafe { env::set_var("GDRIVEUP_TEST_LIMIT_BAD", "0") };
        assert_eq!(read_limit("GDRIVEUP_TEST_LIMIT_BAD", 3), 3);
        unsafe { env::remove_var("GDRIVEUP_TEST_LIMIT_BAD") };
    }

    #[test]
    fn blank_vars_read_as_absent() {
        unsafe { env::set_var("GDRIVEUP_TEST_BLANK", "  ") };
        assert_eq!(read_var("GDRIVEUP_TEST_BLANK"), None);
        unsafe { env::remove_var("GDRIVEUP_TEST_BLANK") };
    }
}
