use super::*;
use crate::clock::FixedClock;
use crate::storage::MemoryTokenStore;
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

const KEY: &str = "access_token";
/// 2999-01-01T00:00:00Z
const FAR_FUTURE_SECS: i64 = 32_472_144_000;
/// 2026-01-01T00:00:00Z
const NOW_MILLIS: i64 = 1_767_225_600_000;

// =========================================================================
// Mocks
// =========================================================================

/// Maps literal token strings to claims; anything else is malformed.
#[derive(Default)]
struct MockDecoder {
    tokens: HashMap<String, Claims>,
}

impl MockDecoder {
    fn with(mut self, token: &str, sub: Option<&str>, id: Option<&str>, exp: Option<i64>) -> Self {
        self.tokens.insert(
            token.to_owned(),
            Claims { sub: sub.map(str::to_owned), id: id.map(str::to_owned), exp },
        );
        self
    }
}

impl TokenDecoder for MockDecoder {
    fn decode(&self, token: &str) -> Result<Claims, ClaimsError> {
        self.tokens.get(token).cloned().ok_or(ClaimsError::MissingPayload)
    }
}

/// Answers per username, optionally after a delay.
#[derive(Default)]
struct MockLogin {
    answers: HashMap<String, (Duration, Result<LoginResponse, LoginError>)>,
    calls: StdMutex<Vec<String>>,
}

impl MockLogin {
    fn answer(mut self, username: &str, result: Result<LoginResponse, LoginError>) -> Self {
        self.answers.insert(username.to_owned(), (Duration::ZERO, result));
        self
    }

    fn answer_after(mut self, username: &str, delay: Duration, result: Result<LoginResponse, LoginError>) -> Self {
        self.answers.insert(username.to_owned(), (delay, result));
        self
    }
}

#[async_trait::async_trait]
impl LoginClient for MockLogin {
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, LoginError> {
        self.calls.lock().unwrap().push(credentials.username.clone());
        let (delay, result) = self
            .answers
            .get(&credentials.username)
            .cloned()
            .unwrap_or((Duration::ZERO, Err(LoginError::Status { status: 404, body: String::new() })));
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result
    }
}

/// Refuses every write and delete.
#[derive(Default)]
struct ReadOnlyStore {
    inner: MemoryTokenStore,
}

impl TokenStore for ReadOnlyStore {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key)
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(StorageError::Rejected("quota exceeded".into()))
    }

    fn remove(&self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable)
    }
}

fn token_response(token: &str) -> LoginResponse {
    LoginResponse { token: Some(token.to_owned()), ..LoginResponse::default() }
}

fn decoder() -> MockDecoder {
    MockDecoder::default()
        .with("alice.tok", Some("alice"), Some("42"), Some(FAR_FUTURE_SECS))
        .with("noid.tok", Some("dora"), None, Some(FAR_FUTURE_SECS))
        .with("expired.tok", Some("old"), Some("1"), Some(1))
        .with("noexp.tok", Some("bob"), None, None)
        .with("nosub.tok", None, Some("9"), Some(FAR_FUTURE_SECS))
        .with("abc.def.ghi", Some("carol"), Some("7"), Some(FAR_FUTURE_SECS))
        .with("dave.tok", Some("dave"), Some("8"), Some(FAR_FUTURE_SECS))
}

struct Harness {
    ctx: SessionContext,
    store: Arc<MemoryTokenStore>,
    login: Arc<MockLogin>,
    clock: Arc<FixedClock>,
}

fn harness(stored: Option<&str>, login: MockLogin) -> Harness {
    let store = Arc::new(MemoryTokenStore::new());
    if let Some(token) = stored {
        store.set(KEY, token).unwrap();
    }
    let login = Arc::new(login);
    let clock = Arc::new(FixedClock::new(NOW_MILLIS));
    let ctx = SessionContext::builder(store.clone(), login.clone())
        .decoder(Arc::new(decoder()))
        .clock(clock.clone())
        .activate();
    Harness { ctx, store, login, clock }
}

// =========================================================================
// SessionUser
// =========================================================================

#[test]
fn signed_out_user_uses_sentinels() {
    let user = SessionUser::signed_out();
    assert_eq!(user.username, NULL_USERNAME);
    assert_eq!(user.user_id, NULL_ID);
    assert_eq!(user.roles, None);
    assert!(user.is_signed_out());
    assert_eq!(SessionUser::default(), user);
}

#[test]
fn from_claims_defaults_missing_id() {
    let claims = Claims { sub: Some("alice".into()), id: None, exp: None };
    let user = SessionUser::from_claims(&claims);
    assert_eq!(user.username, "alice");
    assert_eq!(user.user_id, NULL_ID);
    assert!(!user.is_signed_out());
}

#[test]
fn from_claims_treats_empty_id_as_missing() {
    let claims = Claims { sub: Some("alice".into()), id: Some(String::new()), exp: None };
    assert_eq!(SessionUser::from_claims(&claims).user_id, NULL_ID);
}

#[test]
fn settings_from_config() {
    let config = SessionConfig { storage_key: "tok".into(), log_claims: true, ..SessionConfig::default() };
    let settings = SessionSettings::from(&config);
    assert_eq!(settings, SessionSettings { storage_key: "tok".into(), log_claims: true });
}

// =========================================================================
// activation / refresh_from_storage
// =========================================================================

#[test]
fn starts_signed_out_without_token() {
    let h = harness(None, MockLogin::default());
    assert_eq!(h.ctx.user(), SessionUser::signed_out());
    assert_eq!(h.ctx.current_username(), NULL_USERNAME);
    assert_eq!(h.ctx.current_user_id(), NULL_ID);
}

#[test]
fn activation_restores_user_from_storage() {
    let h = harness(Some("alice.tok"), MockLogin::default());
    assert_eq!(h.ctx.current_username(), "alice");
    assert_eq!(h.ctx.current_user_id(), "42");
}

#[test]
fn refresh_without_token_is_noop() {
    let h = harness(Some("alice.tok"), MockLogin::default());
    h.store.remove(KEY).unwrap();
    let before = h.ctx.user();
    h.ctx.refresh_from_storage();
    assert_eq!(h.ctx.user(), before);
    assert_eq!(h.ctx.current_username(), "alice");
}

#[test]
fn refresh_with_undefined_placeholder_is_noop() {
    let h = harness(None, MockLogin::default());
    h.store.set(KEY, "undefined").unwrap();
    h.ctx.refresh_from_storage();
    assert_eq!(h.ctx.user(), SessionUser::signed_out());
    assert_eq!(h.store.get(KEY).as_deref(), Some("undefined"));
}

#[test]
fn refresh_with_empty_token_is_noop() {
    let h = harness(None, MockLogin::default());
    h.store.set(KEY, "").unwrap();
    h.ctx.refresh_from_storage();
    assert_eq!(h.ctx.user(), SessionUser::signed_out());
}

#[test]
fn refresh_picks_up_new_token() {
    let h = harness(None, MockLogin::default());
    h.store.set(KEY, "alice.tok").unwrap();
    h.ctx.refresh_from_storage();
    assert_eq!(h.ctx.user(), SessionUser { username: "alice".into(), user_id: "42".into(), roles: None });
}

#[test]
fn refresh_without_id_claim_uses_null_id() {
    let h = harness(Some("noid.tok"), MockLogin::default());
    assert_eq!(h.ctx.current_username(), "dora");
    assert_eq!(h.ctx.current_user_id(), NULL_ID);
}

#[test]
fn refresh_with_corrupt_token_signs_out() {
    let h = harness(Some("alice.tok"), MockLogin::default());
    h.store.set(KEY, "garbage").unwrap();
    h.ctx.refresh_from_storage();
    assert_eq!(h.ctx.user(), SessionUser::signed_out());
    assert_eq!(h.store.get(KEY), None);
}

#[test]
fn refresh_with_subjectless_token_signs_out() {
    let h = harness(Some("nosub.tok"), MockLogin::default());
    assert_eq!(h.ctx.user(), SessionUser::signed_out());
    assert_eq!(h.store.get(KEY), None);
}

#[test]
fn refresh_does_not_check_expiry() {
    let h = harness(Some("expired.tok"), MockLogin::default());
    assert_eq!(h.ctx.current_username(), "old");
    assert_eq!(h.store.get(KEY).as_deref(), Some("expired.tok"));
}

// =========================================================================
// log_out
// =========================================================================

#[test]
fn log_out_resets_user_and_storage() {
    let h = harness(Some("alice.tok"), MockLogin::default());
    h.ctx.log_out();
    assert_eq!(h.ctx.current_username(), NULL_USERNAME);
    assert_eq!(h.ctx.current_user_id(), NULL_ID);
    assert_eq!(h.store.get(KEY), None);
}

#[test]
fn log_out_when_signed_out_is_harmless() {
    let h = harness(None, MockLogin::default());
    h.ctx.log_out();
    assert_eq!(h.ctx.user(), SessionUser::signed_out());
}

#[test]
fn log_out_resets_state_even_if_delete_fails() {
    let store = Arc::new(ReadOnlyStore::default());
    store.inner.set(KEY, "alice.tok").unwrap();
    let ctx = SessionContext::builder(store.clone(), Arc::new(MockLogin::default()))
        .decoder(Arc::new(decoder()))
        .activate();
    assert_eq!(ctx.current_username(), "alice");

    ctx.log_out();
    assert_eq!(ctx.user(), SessionUser::signed_out());
    assert_eq!(store.get(KEY).as_deref(), Some("alice.tok"));
}

// =========================================================================
// is_authenticated
// =========================================================================

#[test]
fn is_authenticated_false_without_token() {
    let h = harness(None, MockLogin::default());
    assert!(!h.ctx.is_authenticated());
}

#[test]
fn is_authenticated_false_for_placeholder_token() {
    let h = harness(None, MockLogin::default());
    h.store.set(KEY, "undefined").unwrap();
    assert!(!h.ctx.is_authenticated());
}

#[test]
fn is_authenticated_true_for_future_expiry() {
    let h = harness(Some("alice.tok"), MockLogin::default());
    assert!(h.ctx.is_authenticated());
    assert_eq!(h.store.get(KEY).as_deref(), Some("alice.tok"));
    assert_eq!(h.ctx.current_username(), "alice");
}

#[test]
fn is_authenticated_expired_token_signs_out() {
    let h = harness(Some("expired.tok"), MockLogin::default());
    assert!(!h.ctx.is_authenticated());
    assert_eq!(h.store.get(KEY), None);
    assert_eq!(h.ctx.user(), SessionUser::signed_out());
}

#[test]
fn is_authenticated_missing_expiry_keeps_storage() {
    let h = harness(Some("noexp.tok"), MockLogin::default());
    assert!(!h.ctx.is_authenticated());
    assert_eq!(h.store.get(KEY).as_deref(), Some("noexp.tok"));
    assert_eq!(h.ctx.current_username(), "bob");
}

#[test]
fn is_authenticated_corrupt_token_signs_out() {
    let h = harness(Some("alice.tok"), MockLogin::default());
    h.store.set(KEY, "garbage").unwrap();
    assert!(!h.ctx.is_authenticated());
    assert_eq!(h.store.get(KEY), None);
    assert_eq!(h.ctx.user(), SessionUser::signed_out());
}

#[test]
fn is_authenticated_expiry_boundary() {
    let h = harness(Some("alice.tok"), MockLogin::default());
    let exp_millis = FAR_FUTURE_SECS * 1000;

    h.clock.set(exp_millis);
    assert!(h.ctx.is_authenticated());

    h.clock.set(exp_millis + 1);
    assert!(!h.ctx.is_authenticated());
    assert_eq!(h.store.get(KEY), None);
}

// =========================================================================
// log_in
// =========================================================================

#[tokio::test]
async fn log_in_with_token_stores_and_adopts_identity() {
    let h = harness(None, MockLogin::default().answer("carol", Ok(token_response("abc.def.ghi"))));
    let resp = h.ctx.log_in(&Credentials::new("carol", "pw")).await.unwrap();

    assert_eq!(resp.token.as_deref(), Some("abc.def.ghi"));
    assert_eq!(h.store.get(KEY).as_deref(), Some("abc.def.ghi"));
    assert_eq!(h.ctx.current_username(), "carol");
    assert_eq!(h.ctx.current_user_id(), "7");
    assert!(h.ctx.is_authenticated());
}

#[tokio::test]
async fn log_in_without_token_leaves_state() {
    let mut message = LoginResponse::default();
    message.extra.insert("message".into(), "verify your email".into());
    let h = harness(Some("alice.tok"), MockLogin::default().answer("carol", Ok(message.clone())));

    let resp = h.ctx.log_in(&Credentials::new("carol", "pw")).await.unwrap();
    assert_eq!(resp, message);
    assert_eq!(h.ctx.current_username(), "alice");
    assert_eq!(h.store.get(KEY).as_deref(), Some("alice.tok"));
}

#[tokio::test]
async fn log_in_with_undefined_token_leaves_state() {
    let h = harness(None, MockLogin::default().answer("carol", Ok(token_response("undefined"))));
    let resp = h.ctx.log_in(&Credentials::new("carol", "pw")).await.unwrap();
    assert_eq!(resp.token.as_deref(), Some("undefined"));
    assert_eq!(h.ctx.user(), SessionUser::signed_out());
    assert_eq!(h.store.get(KEY), None);
}

#[tokio::test]
async fn log_in_error_is_passed_through() {
    let rejection = LoginError::Status { status: 401, body: "bad credentials".into() };
    let h = harness(Some("alice.tok"), MockLogin::default().answer("carol", Err(rejection.clone())));

    let err = h.ctx.log_in(&Credentials::new("carol", "wrong")).await.unwrap_err();
    match err {
        SessionError::Login(e) => assert_eq!(e, rejection),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(h.ctx.current_username(), "alice");
    assert_eq!(h.store.get(KEY).as_deref(), Some("alice.tok"));
}

#[tokio::test]
async fn log_in_with_undecodable_token_errors_without_side_effects() {
    let h = harness(Some("alice.tok"), MockLogin::default().answer("carol", Ok(token_response("not-a-token"))));

    let err = h.ctx.log_in(&Credentials::new("carol", "pw")).await.unwrap_err();
    assert!(matches!(err, SessionError::Token(ClaimsError::MissingPayload)));
    assert_eq!(h.ctx.current_username(), "alice");
    assert_eq!(h.store.get(KEY).as_deref(), Some("alice.tok"));
}

#[tokio::test]
async fn log_in_storage_failure_leaves_state() {
    let ctx = SessionContext::builder(
        Arc::new(ReadOnlyStore::default()),
        Arc::new(MockLogin::default().answer("carol", Ok(token_response("abc.def.ghi")))),
    )
    .decoder(Arc::new(decoder()))
    .activate();

    let err = ctx.log_in(&Credentials::new("carol", "pw")).await.unwrap_err();
    assert!(matches!(err, SessionError::Storage(StorageError::Rejected(_))));
    assert_eq!(ctx.user(), SessionUser::signed_out());
}

#[tokio::test]
async fn log_in_forwards_credentials() {
    let h = harness(None, MockLogin::default().answer("carol", Ok(token_response("abc.def.ghi"))));
    h.ctx.log_in(&Credentials::new("carol", "pw")).await.unwrap();
    assert_eq!(*h.login.calls.lock().unwrap(), vec!["carol".to_owned()]);
}

#[tokio::test]
async fn overlapping_logins_apply_in_call_order() {
    let login = MockLogin::default()
        .answer_after("carol", Duration::from_millis(50), Ok(token_response("abc.def.ghi")))
        .answer("dave", Ok(token_response("dave.tok")));
    let h = harness(None, login);

    let carol = Credentials::new("carol", "pw");
    let dave = Credentials::new("dave", "pw");
    let (first, second) = tokio::join!(h.ctx.log_in(&carol), h.ctx.log_in(&dave));
    first.unwrap();
    second.unwrap();

    assert_eq!(*h.login.calls.lock().unwrap(), vec!["carol".to_owned(), "dave".to_owned()]);
    assert_eq!(h.ctx.current_username(), "dave");
    assert_eq!(h.store.get(KEY).as_deref(), Some("dave.tok"));
}

#[tokio::test]
async fn dropped_login_applies_nothing() {
    let login =
        MockLogin::default().answer_after("carol", Duration::from_millis(200), Ok(token_response("abc.def.ghi")));
    let h = harness(None, login);

    let creds = Credentials::new("carol", "pw");
    let outcome = tokio::time::timeout(Duration::from_millis(10), h.ctx.log_in(&creds)).await;
    assert!(outcome.is_err());
    assert_eq!(h.ctx.user(), SessionUser::signed_out());
    assert_eq!(h.store.get(KEY), None);
}

// =========================================================================
// sharing / subscription
// =========================================================================

#[tokio::test]
async fn clones_share_state() {
    let h = harness(None, MockLogin::default().answer("carol", Ok(token_response("abc.def.ghi"))));
    let other = h.ctx.clone();
    h.ctx.log_in(&Credentials::new("carol", "pw")).await.unwrap();
    assert_eq!(other.current_username(), "carol");
    other.log_out();
    assert_eq!(h.ctx.current_username(), NULL_USERNAME);
}

#[tokio::test]
async fn subscribers_observe_transitions() {
    let h = harness(None, MockLogin::default().answer("carol", Ok(token_response("abc.def.ghi"))));
    let mut rx = h.ctx.subscribe();
    assert!(rx.borrow_and_update().is_signed_out());

    h.ctx.log_in(&Credentials::new("carol", "pw")).await.unwrap();
    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().username, "carol");

    h.ctx.log_out();
    rx.changed().await.unwrap();
    assert!(rx.borrow_and_update().is_signed_out());
}

#[test]
fn unchanged_state_does_not_notify() {
    let h = harness(None, MockLogin::default());
    let mut rx = h.ctx.subscribe();
    let _ = rx.borrow_and_update();
    h.ctx.log_out();
    h.ctx.refresh_from_storage();
    assert!(!rx.has_changed().unwrap());
}

#[test]
fn debug_shows_user_and_key() {
    let h = harness(Some("alice.tok"), MockLogin::default());
    let debug = format!("{:?}", h.ctx);
    assert!(debug.contains("alice"));
    assert!(debug.contains(KEY));
}
