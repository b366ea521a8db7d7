use super::*;
use serial_test::serial;
use tempfile::TempDir;

use crate::database::models::NewApiKey;

struct EnvGuard(Option<String>);

impl EnvGuard {
    fn set(value: Option<&str>) -> Self {
        let previous = std::env::var(OPENAI_KEY_ENV).ok();
        // SAFETY: serialized by #[serial]; no other thread touches the environment
        unsafe {
            match value {
                Some(v) => std::env::set_var(OPENAI_KEY_ENV, v),
                None => std::env::remove_var(OPENAI_KEY_ENV),
            }
        }
        Self(previous)
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        // SAFETY: serialized by #[serial]; no other thread touches the environment
        unsafe {
            match &self.0 {
                Some(v) => std::env::set_var(OPENAI_KEY_ENV, v),
                None => std::env::remove_var(OPENAI_KEY_ENV),
            }
        }
    }
}

#[test]
fn stored_key_wins() {
    assert_eq!(
        choose_key(Some("sk-db".to_string()), Some("sk-env".to_string())),
        Some(("sk-db".to_string(), KeySource::Database))
    );
}

#[test]
fn blank_values_are_absent() {
    assert_eq!(
        choose_key(Some("  ".to_string()), Some("sk-env".to_string())),
        Some(("sk-env".to_string(), KeySource::Environment))
    );
    assert_eq!(choose_key(None, Some(String::new())), None);
    assert_eq!(choose_key(None, None), None);
}

#[tokio::test]
#[serial]
async fn environment_is_the_fallback() {
    let _guard = EnvGuard::set(Some("sk-from-env"));

    let key = resolve_openai_key(None)
        .await
        .expect("env key should resolve");
    assert_eq!(key, "sk-from-env");
}

#[tokio::test]
#[serial]
async fn missing_key_is_a_configuration_error() {
    let _guard = EnvGuard::set(None);

    let err = resolve_openai_key(None)
        .await
        .expect_err("no key anywhere must fail");
    assert!(matches!(err, KbError::Config(_)));
}

#[tokio::test]
#[serial]
async fn database_key_beats_environment() {
    let _guard = EnvGuard::set(Some("sk-from-env"));
    let temp_dir = TempDir::new().expect("should create temp dir");
    let database = Database::initialize_from_config_dir(temp_dir.path())
        .await
        .expect("database should open");

    database
        .create_api_key(NewApiKey {
            key_type: KeyType::OpenAi,
            key_name: "stored".to_string(),
            key_value: "sk-from-database".to_string(),
            description: None,
        })
        .await
        .expect("key should store");

    let key = resolve_openai_key(Some(&database))
        .await
        .expect("stored key should resolve");
    assert_eq!(key, "sk-from-database");
}
