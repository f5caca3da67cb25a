use super::support::user;
use lexis_core::{CredentialPair, SessionFile, SessionStore};
use tempfile::TempDir;

fn pair(access: &str, refresh: &str) -> CredentialPair {
    CredentialPair {
        access_token: access.into(),
        refresh_token: refresh.into(),
    }
}

#[test]
fn bearer_session_survives_a_restart() {
    let dir = TempDir::new().expect("temp dir");
    let store = SessionStore::with_file(SessionFile::new(dir.path().to_path_buf()));
    store.login(user(), Some(pair("a1", "r1")));
    assert!(store.update_credential(pair("a2", "r2")));

    let restored = SessionStore::with_file(SessionFile::new(dir.path().to_path_buf()));
    assert!(restored.is_authenticated());
    assert_eq!(restored.user(), Some(user()));
    assert_eq!(restored.access_token().as_deref(), Some("a2"));
    assert_eq!(restored.refresh_token().as_deref(), Some("r2"));
}

#[test]
fn logout_removes_the_record() {
    let dir = TempDir::new().expect("temp dir");
    let file = SessionFile::new(dir.path().to_path_buf());
    let store = SessionStore::with_file(file.clone());
    store.login(user(), None);
    assert!(file.path().exists());

    store.logout();

    assert!(!file.path().exists());
    assert!(!SessionStore::with_file(file).is_authenticated());
}

#[test]
fn unreadable_record_starts_logged_out() {
    let dir = TempDir::new().expect("temp dir");
    let file = SessionFile::new(dir.path().to_path_buf());
    std::fs::write(file.path(), "{ not json").expect("write");

    let store = SessionStore::with_file(file);

    assert!(!store.is_authenticated());
    assert!(store.user().is_none());
}

#[test]
fn refreshed_tokens_are_ignored_after_logout() {
    let dir = TempDir::new().expect("temp dir");
    let file = SessionFile::new(dir.path().to_path_buf());
    let store = SessionStore::with_file(file.clone());
    store.login(user(), Some(pair("a1", "r1")));
    store.logout();

    assert!(!store.update_credential(pair("late", "late")));
    assert!(!file.path().exists());
    assert!(store.access_token().is_none());
}
