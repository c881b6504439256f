//! Tests for auth module
//!
//! These run the token, code, identity and session components against an
//! in-memory SQLite database with the real schema, plus fake email and
//! provider collaborators.

#[cfg(test)]
mod tests {
    use super::super::*;
    use async_trait::async_trait;
    use axum::{
        extract::{Extension, FromRequestParts, Path, Query},
        http::{
            header::{COOKIE, LOCATION, SET_COOKIE},
            HeaderMap, HeaderValue, StatusCode,
        },
        Json,
    };
    use chrono::{Duration, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use super::super::codes::VerificationCodeManager;
    use super::super::identity::IdentityResolver;
    use super::super::models::*;
    use super::super::tokens::TokenService;

    use crate::common::migrations::create_schema;
    use crate::common::{ApiError, AppState, AuthConfig, ProviderConfig, Validator};
    use crate::services::email::{EmailError, EmailService};
    use crate::services::oauth::{IdentityProvider, OAuthError, ProviderRegistry};

    const SECRET: &str = "test_secret_key";

    // ---- Fakes ----

    #[derive(Default)]
    struct RecordingEmailService {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingEmailService {
        fn codes_for(&self, email: &str) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(to, _)| to == email)
                .map(|(_, code)| code.clone())
                .collect()
        }

        fn last_code_for(&self, email: &str) -> String {
            self.codes_for(email).pop().expect("a code was sent")
        }
    }

    #[async_trait]
    impl EmailService for RecordingEmailService {
        async fn send_code(&self, email: &str, code: &str) -> Result<(), EmailError> {
            self.sent
                .lock()
                .unwrap()
                .push((email.to_string(), code.to_string()));
            Ok(())
        }
    }

    struct FailingEmailService;

    #[async_trait]
    impl EmailService for FailingEmailService {
        async fn send_code(&self, _email: &str, _code: &str) -> Result<(), EmailError> {
            Err(EmailError::SESError("mailbox unavailable".to_string()))
        }
    }

    /// Completes the handshake only when the callback carries `code=good`
    struct ScriptedProvider {
        name: String,
        profile: FederatedProfile,
    }

    #[async_trait]
    impl IdentityProvider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn begin_handshake(&self, _ctx: &HandshakeContext) -> Result<String, OAuthError> {
            Ok(format!("https://{}.test/authorize", self.name))
        }

        async fn complete_handshake(
            &self,
            ctx: &HandshakeContext,
        ) -> Result<FederatedProfile, OAuthError> {
            match ctx.param("code") {
                Some("good") => Ok(self.profile.clone()),
                Some(_) => Err(OAuthError::TokenExchange("bad_verification_code".to_string())),
                None => Err(OAuthError::MissingParam("code".to_string())),
            }
        }
    }

    fn octocat() -> FederatedProfile {
        FederatedProfile {
            subject_id: "583231".to_string(),
            email: "octocat@github.com".to_string(),
            display_name: "The Octocat".to_string(),
            avatar_url: "https://avatars.githubusercontent.com/u/583231".to_string(),
            provider_name: "github".to_string(),
            raw: serde_json::json!({"id": 583231, "login": "octocat"}),
        }
    }

    // ---- Harness ----

    fn test_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: SECRET.to_string(),
            providers: ["github", "google"]
                .iter()
                .map(|name| ProviderConfig {
                    name: name.to_string(),
                    client_id: "client".to_string(),
                    client_secret: "secret".to_string(),
                    redirect_uri: format!("http://localhost:8080/auth/{}/callback", name),
                })
                .collect(),
            frontend_url: "http://localhost:3000".to_string(),
            ..AuthConfig::default()
        }
    }

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test database");
        create_schema(&pool)
            .await
            .expect("Failed to create schema");
        pool
    }

    struct Harness {
        pool: SqlitePool,
        db: Arc<dyn Database>,
        email: Arc<RecordingEmailService>,
        config: AuthConfig,
        session: Arc<SessionOrchestrator>,
    }

    impl Harness {
        async fn new() -> Self {
            Self::with_config(test_config()).await
        }

        async fn with_config(config: AuthConfig) -> Self {
            let email = Arc::new(RecordingEmailService::default());
            Self::build(config, email.clone(), email).await
        }

        async fn build(
            config: AuthConfig,
            email: Arc<RecordingEmailService>,
            delivery: Arc<dyn EmailService>,
        ) -> Self {
            let pool = setup_test_db().await;
            let db: Arc<dyn Database> = Arc::new(SqliteDatabase::new(pool.clone()));

            let mut providers = ProviderRegistry::new();
            for name in ["github", "google"] {
                providers.register(Arc::new(ScriptedProvider {
                    name: name.to_string(),
                    profile: FederatedProfile {
                        provider_name: name.to_string(),
                        ..octocat()
                    },
                }));
            }

            let session = SessionOrchestrator::new(
                TokenService::new(db.clone(), &config),
                VerificationCodeManager::new(db.clone(), delivery, &config),
                IdentityResolver::new(db.clone(), providers.names()),
                providers,
            );

            Self {
                pool,
                db,
                email,
                config,
                session: Arc::new(session),
            }
        }

        fn tokens(&self) -> TokenService {
            TokenService::new(self.db.clone(), &self.config)
        }

        fn codes(&self) -> VerificationCodeManager {
            VerificationCodeManager::new(self.db.clone(), self.email.clone(), &self.config)
        }

        fn identities(&self) -> IdentityResolver {
            IdentityResolver::new(
                self.db.clone(),
                vec!["github".to_string(), "google".to_string()],
            )
        }

        fn state(&self) -> Arc<AppState> {
            Arc::new(AppState {
                config: Arc::new(self.config.clone()),
                session: self.session.clone(),
            })
        }

        async fn seed_user(&self, id: &str) -> User {
            let user = User {
                id: id.to_string(),
                username: "seed".to_string(),
                email: format!("{}@example.com", id),
                picture: String::new(),
            };
            let identity = FederatedIdentity {
                id: id.to_string(),
                user_id: id.to_string(),
                provider: LOCAL_PROVIDER.to_string(),
                data: "{}".to_string(),
            };
            self.db.register_user(&user, &identity).await.unwrap()
        }

        async fn count(&self, table: &str) -> i64 {
            sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&self.pool)
                .await
                .unwrap()
        }

        async fn local_login(&self, email: &str) -> AuthTokens {
            self.session.begin_local(email).await.unwrap();
            let code = self.email.last_code_for(email);
            self.session.complete_local(&code, email).await.unwrap()
        }
    }

    fn ctx(pairs: &[(&str, &str)]) -> HandshakeContext {
        HandshakeContext {
            query: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn expired_claims(user_id: &str) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            user_id: user_id.to_string(),
            iat: now - 7200,
            nbf: now - 7200,
            exp: now - 3600,
        }
    }

    // ---- Token service ----

    #[tokio::test]
    async fn test_access_token_round_trip() {
        let h = Harness::new().await;
        let user = h.seed_user("user-123").await;

        let token = h.tokens().create_access_token(&user).unwrap();
        let claims = h.tokens().verify_access_token(&token).unwrap();

        assert_eq!(claims.user_id, "user-123");
        assert_eq!(claims.iat, claims.nbf);
        let expected_exp = (Utc::now() + Duration::hours(24)).timestamp();
        assert!((claims.exp - expected_exp).abs() <= 5);
    }

    #[tokio::test]
    async fn test_access_token_verification_failures() {
        let h = Harness::new().await;
        let tokens = h.tokens();

        let expired = tokens.sign_claims(&expired_claims("user-123")).unwrap();
        assert!(matches!(
            tokens.verify_access_token(&expired),
            Err(AuthError::TokenExpired)
        ));

        assert!(matches!(
            tokens.verify_access_token("not.a.jwt"),
            Err(AuthError::TokenMalformed)
        ));

        let other = TokenService::new(
            h.db.clone(),
            &AuthConfig {
                jwt_secret: "wrong_secret_key".to_string(),
                ..AuthConfig::default()
            },
        );
        let forged = other
            .create_access_token(&User {
                id: "user-123".to_string(),
                username: "x".to_string(),
                email: "x@y.z".to_string(),
                picture: String::new(),
            })
            .unwrap();
        assert!(matches!(
            tokens.verify_access_token(&forged),
            Err(AuthError::TokenInvalidSignature)
        ));
    }

    #[tokio::test]
    async fn test_access_token_requires_signing_key() {
        let h = Harness::with_config(AuthConfig::default()).await;
        let user = h.seed_user("user-123").await;

        assert!(matches!(
            h.tokens().create_access_token(&user),
            Err(AuthError::Signing(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_token_lifecycle() {
        let h = Harness::new().await;
        h.seed_user("user-123").await;
        let tokens = h.tokens();

        let value = tokens.create_refresh_token("user-123").await.unwrap();
        assert_eq!(value.len(), 43);
        assert_eq!(tokens.verify_refresh_token(&value).await.unwrap(), "user-123");

        tokens.invalidate_refresh_token(&value).await.unwrap();
        assert!(matches!(
            tokens.verify_refresh_token(&value).await,
            Err(AuthError::NotFound(_))
        ));
        // Idempotent
        tokens.invalidate_refresh_token(&value).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_refresh_token_is_deleted() {
        let h = Harness::with_config(AuthConfig {
            refresh_token_ttl: Duration::seconds(-10),
            ..test_config()
        })
        .await;
        h.seed_user("user-123").await;
        let tokens = h.tokens();

        let value = tokens.create_refresh_token("user-123").await.unwrap();
        assert!(matches!(
            tokens.verify_refresh_token(&value).await,
            Err(AuthError::TokenExpired)
        ));
        assert!(h.db.get_opaque_token(&value).await.unwrap().is_none());
        assert!(tokens.invalidate_refresh_token(&value).await.is_ok());
    }

    // ---- Verification codes ----

    #[tokio::test]
    async fn test_reissue_replaces_previous_code() {
        let h = Harness::new().await;
        let codes = h.codes();

        codes.issue("a@b.com").await.unwrap();
        codes.issue("a@b.com").await.unwrap();

        let sent = h.email.codes_for("a@b.com");
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].len(), 6);
        assert_eq!(h.count("verification_codes").await, 1);

        let live = h.db.get_verification_code("a@b.com").await.unwrap().unwrap();
        assert_eq!(live.code, sent[1]);

        if sent[0] != sent[1] {
            assert!(matches!(
                codes.redeem("a@b.com", &sent[0]).await,
                Err(AuthError::InvalidCode)
            ));
        }
        codes.redeem("a@b.com", &sent[1]).await.unwrap();
    }

    #[tokio::test]
    async fn test_code_redeems_once() {
        let h = Harness::new().await;
        let codes = h.codes();

        codes.issue("a@b.com").await.unwrap();
        let code = h.email.last_code_for("a@b.com");

        codes.redeem("a@b.com", &code).await.unwrap();
        assert!(matches!(
            codes.redeem("a@b.com", &code).await,
            Err(AuthError::InvalidCode)
        ));
    }

    #[tokio::test]
    async fn test_expired_code_rejected_and_removed() {
        let h = Harness::with_config(AuthConfig {
            verification_code_ttl: Duration::seconds(-10),
            ..test_config()
        })
        .await;
        let codes = h.codes();

        codes.issue("a@b.com").await.unwrap();
        let code = h.email.last_code_for("a@b.com");

        assert!(matches!(
            codes.redeem("a@b.com", &code).await,
            Err(AuthError::InvalidCode)
        ));
        assert!(h.db.get_verification_code("a@b.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delivery_failure_keeps_code() {
        let config = test_config();
        let h = Harness::build(
            config,
            Arc::new(RecordingEmailService::default()),
            Arc::new(FailingEmailService),
        )
        .await;

        h.session.begin_local("a@b.com").await.unwrap();
        assert!(h.db.get_verification_code("a@b.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_issue_retries_are_bounded() {
        let h = Harness::with_config(AuthConfig {
            verification_code_issue_attempts: 1,
            ..test_config()
        })
        .await;
        let codes = h.codes();

        codes.issue("a@b.com").await.unwrap();
        assert!(matches!(
            codes.issue("a@b.com").await,
            Err(AuthError::Persistence(StoreError::Conflict(_)))
        ));
    }

    // ---- Identity resolution ----

    #[tokio::test]
    async fn test_resolve_federated_is_idempotent() {
        let h = Harness::new().await;
        let resolver = h.identities();

        let first = resolver.resolve_federated("github", &octocat()).await.unwrap();
        let second = resolver.resolve_federated("github", &octocat()).await.unwrap();

        assert_eq!(first.id, "583231");
        assert_eq!(first.id, second.id);
        assert_eq!(first.username, "The Octocat");
        assert_eq!(h.count("users").await, 1);
        assert_eq!(h.count("federated_identities").await, 1);

        let identity = h.db.get_federated_identity_by_user(&first.id).await.unwrap().unwrap();
        assert_eq!(identity.provider, "github");
        assert!(identity.data.contains("octocat"));
    }

    #[tokio::test]
    async fn test_resolve_federated_unknown_provider() {
        let h = Harness::new().await;
        assert!(matches!(
            h.identities().resolve_federated("gitlab", &octocat()).await,
            Err(AuthError::UnknownProvider(name)) if name == "gitlab"
        ));
        assert_eq!(h.count("users").await, 0);
    }

    #[tokio::test]
    async fn test_resolve_local_user() {
        let h = Harness::new().await;
        let resolver = h.identities();

        let user = resolver.resolve_local("jane.doe@example.com").await.unwrap();
        assert_eq!(user.id, "jane.doe@example.com");
        assert_eq!(user.username, "jane.doe");
        assert_eq!(
            user.picture,
            "https://vercel.com/api/www/avatar/?u=jane.doe%40example.com&s=80"
        );

        let again = resolver.resolve_local("jane.doe@example.com").await.unwrap();
        assert_eq!(again, user);
        assert_eq!(h.count("federated_identities").await, 1);
    }

    #[tokio::test]
    async fn test_register_user_is_atomic() {
        let h = Harness::new().await;
        h.seed_user("first").await;

        let user = User {
            id: "second".to_string(),
            username: "second".to_string(),
            email: "second@example.com".to_string(),
            picture: String::new(),
        };
        // Identity already linked to "first"
        let identity = FederatedIdentity {
            id: "first".to_string(),
            user_id: "second".to_string(),
            provider: LOCAL_PROVIDER.to_string(),
            data: "{}".to_string(),
        };

        assert!(matches!(
            h.db.register_user(&user, &identity).await,
            Err(StoreError::Conflict(_))
        ));
        assert!(h.db.get_user_by_id("second").await.unwrap().is_none());
        assert_eq!(h.count("users").await, 1);
    }

    #[tokio::test]
    async fn test_user_id_collision_across_providers() {
        let h = Harness::new().await;
        let resolver = h.identities();

        let google = FederatedProfile {
            provider_name: "google".to_string(),
            ..octocat()
        };
        resolver.resolve_federated("google", &google).await.unwrap();

        // Same subject id from another provider maps to the same user id
        assert!(matches!(
            resolver.resolve_federated("github", &octocat()).await,
            Err(AuthError::Persistence(StoreError::Conflict(_)))
        ));
        assert_eq!(h.count("users").await, 1);
    }

    // ---- Session flows ----

    #[tokio::test]
    async fn test_local_login_end_to_end() {
        let h = Harness::new().await;

        let tokens = h.local_login("a@b.com").await;

        let claims = h.tokens().verify_access_token(&tokens.access_token).unwrap();
        let user = h.db.get_user_by_id(&claims.user_id).await.unwrap().unwrap();
        assert_eq!(user.username, "a");
        assert_eq!(
            h.tokens().verify_refresh_token(&tokens.refresh_token).await.unwrap(),
            claims.user_id
        );
    }

    #[tokio::test]
    async fn test_complete_local_twice_fails() {
        let h = Harness::new().await;

        h.session.begin_local("a@b.com").await.unwrap();
        let code = h.email.last_code_for("a@b.com");

        h.session.complete_local(&code, "a@b.com").await.unwrap();
        assert!(matches!(
            h.session.complete_local(&code, "a@b.com").await,
            Err(AuthError::InvalidCode)
        ));
    }

    #[tokio::test]
    async fn test_renew_only_accepts_expired_tokens() {
        let h = Harness::new().await;
        let tokens = h.local_login("a@b.com").await;
        let refresh_before = h.count("opaque_tokens").await;

        assert!(matches!(
            h.session.renew(&tokens.access_token).await,
            Err(AuthError::TokenNotExpired)
        ));
        assert!(matches!(
            h.session.renew("garbage").await,
            Err(AuthError::TokenMalformed)
        ));
        assert_eq!(h.count("opaque_tokens").await, refresh_before);

        let expired = h.tokens().sign_claims(&expired_claims("a@b.com")).unwrap();
        let renewed = h.session.renew(&expired).await.unwrap();
        let claims = h.tokens().verify_access_token(&renewed.access_token).unwrap();
        assert_eq!(claims.user_id, "a@b.com");
        assert_eq!(h.count("opaque_tokens").await, refresh_before + 1);
    }

    #[tokio::test]
    async fn test_renew_unknown_user() {
        let h = Harness::new().await;
        let expired = h.tokens().sign_claims(&expired_claims("ghost")).unwrap();

        assert!(matches!(
            h.session.renew(&expired).await,
            Err(AuthError::NotFound(_))
        ));
        assert_eq!(h.count("opaque_tokens").await, 0);
    }

    #[tokio::test]
    async fn test_refresh_rotates_token() {
        let h = Harness::new().await;
        let tokens = h.local_login("a@b.com").await;

        let rotated = h.session.refresh(&tokens.refresh_token).await.unwrap();
        assert_ne!(rotated.refresh_token, tokens.refresh_token);

        assert!(matches!(
            h.tokens().verify_refresh_token(&tokens.refresh_token).await,
            Err(AuthError::NotFound(_))
        ));
        assert_eq!(
            h.tokens().verify_refresh_token(&rotated.refresh_token).await.unwrap(),
            "a@b.com"
        );
        assert!(matches!(
            h.session.refresh(&tokens.refresh_token).await,
            Err(AuthError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let h = Harness::new().await;
        let tokens = h.local_login("a@b.com").await;

        h.session.logout(Some(&tokens.refresh_token)).await.unwrap();
        h.session.logout(Some(&tokens.refresh_token)).await.unwrap();
        h.session.logout(None).await.unwrap();

        assert!(matches!(
            h.session.refresh(&tokens.refresh_token).await,
            Err(AuthError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_introspect() {
        let h = Harness::new().await;
        let tokens = h.local_login("a@b.com").await;

        let info = h.session.introspect(&tokens.access_token).await.unwrap();
        assert_eq!(info.user.email, "a@b.com");
        assert_eq!(info.claims.user_id, "a@b.com");
        let identity = info.federated_identity.unwrap();
        assert_eq!(identity.provider, LOCAL_PROVIDER);
        assert_eq!(identity.user_id, "a@b.com");
    }

    #[tokio::test]
    async fn test_federated_flows() {
        let h = Harness::new().await;

        assert_eq!(
            h.session.begin_federated("github", &ctx(&[]), None).await.unwrap(),
            BeginOutcome::Redirect("https://github.test/authorize".to_string())
        );
        assert!(matches!(
            h.session.begin_federated("gitlab", &ctx(&[]), None).await,
            Err(AuthError::UnknownProvider(_))
        ));

        let tokens = h
            .session
            .complete_federated("github", &ctx(&[("code", "good")]))
            .await
            .unwrap();
        let claims = h.tokens().verify_access_token(&tokens.access_token).unwrap();
        assert_eq!(claims.user_id, "583231");

        assert!(matches!(
            h.session
                .complete_federated("github", &ctx(&[("code", "stale")]))
                .await,
            Err(AuthError::CantCompleteAuth(_))
        ));
        assert!(matches!(
            h.session
                .complete_federated("gitlab", &ctx(&[("code", "good")]))
                .await,
            Err(AuthError::UnknownProvider(_))
        ));
    }

    // ---- HTTP handlers ----

    #[tokio::test]
    async fn test_local_begin_validates_email() {
        let h = Harness::new().await;

        let result = handlers::local_begin(
            Extension(h.state()),
            Json(LocalBeginRequest {
                email: "not-an-email".to_string(),
            }),
        )
        .await;

        assert!(matches!(result, Err(ApiError::ValidationError(_))));
        assert!(h.email.codes_for("not-an-email").is_empty());
    }

    #[tokio::test]
    async fn test_local_verify_handler_sets_cookies() {
        let h = Harness::new().await;

        handlers::local_begin(
            Extension(h.state()),
            Json(LocalBeginRequest {
                email: " a@b.com ".to_string(),
            }),
        )
        .await
        .unwrap();
        let code = h.email.last_code_for("a@b.com");

        let response = handlers::local_verify(
            Extension(h.state()),
            Json(LocalVerifyRequest {
                token: code,
                email: "a@b.com".to_string(),
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let cookies: Vec<_> = response.headers().get_all(SET_COOKIE).iter().collect();
        assert_eq!(cookies.len(), 2);
        assert!(cookies[0].to_str().unwrap().starts_with("access_token="));
        assert!(cookies[1].to_str().unwrap().starts_with("refresh_token="));
    }

    #[tokio::test]
    async fn test_renew_handler_rejects_valid_token() {
        let h = Harness::new().await;
        let tokens = h.local_login("a@b.com").await;

        let result = handlers::renew(
            Extension(h.state()),
            extractors::BearerToken(tokens.access_token),
        )
        .await;
        let Err(err) = result else {
            panic!("renewal of a valid token should fail");
        };

        assert_eq!(
            err.status_and_code(),
            (StatusCode::UNAUTHORIZED, "TOKEN_NOT_EXPIRED")
        );
    }

    #[tokio::test]
    async fn test_me_handler() {
        let h = Harness::new().await;
        let tokens = h.local_login("a@b.com").await;

        let Json(info) = handlers::me(
            Extension(h.state()),
            extractors::BearerToken(tokens.access_token),
        )
        .await
        .unwrap();

        assert_eq!(info.user.username, "a");
    }

    #[tokio::test]
    async fn test_refresh_handler_reads_cookie() {
        let h = Harness::new().await;
        let tokens = h.local_login("a@b.com").await;

        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("refresh_token={}", tokens.refresh_token)).unwrap(),
        );

        let response = handlers::refresh(Extension(h.state()), headers, None)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let missing = handlers::refresh(Extension(h.state()), HeaderMap::new(), None).await;
        assert!(matches!(missing, Err(ApiError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_logout_handler_clears_cookies() {
        let h = Harness::new().await;
        let tokens = h.local_login("a@b.com").await;

        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("refresh_token={}", tokens.refresh_token)).unwrap(),
        );

        let response = handlers::logout(Extension(h.state()), headers).await.unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(LOCATION).unwrap(),
            "http://localhost:3000"
        );
        for cookie in response.headers().get_all(SET_COOKIE) {
            assert!(cookie.to_str().unwrap().contains("Max-Age=0"));
        }
        assert!(h.db.get_opaque_token(&tokens.refresh_token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_federated_callback_handler() {
        let h = Harness::new().await;

        let response = handlers::federated_callback(
            Extension(h.state()),
            Path("github".to_string()),
            Query(HashMap::from([("code".to_string(), "good".to_string())])),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers().get_all(SET_COOKIE).iter().count(), 2);

        let unknown = handlers::begin_federated(
            Extension(h.state()),
            Path("gitlab".to_string()),
            Query(HashMap::new()),
            None,
        )
        .await;
        assert!(matches!(
            unknown,
            Err(ApiError::Auth(AuthError::UnknownProvider(_)))
        ));
    }

    #[test]
    fn test_local_verify_validation() {
        let bad = validators::LocalLoginValidator.validate(&LocalVerifyRequest {
            token: "12ab56".to_string(),
            email: "a@b.com".to_string(),
        });
        assert!(!bad.is_valid);
        assert_eq!(bad.errors[0].field, "token");

        let good = validators::LocalLoginValidator.validate(&LocalVerifyRequest {
            token: "123456".to_string(),
            email: "a@b.com".to_string(),
        });
        assert!(good.is_valid);
    }

    #[test]
    fn test_auth_error_status_mapping() {
        let cases = [
            (AuthError::InvalidCode, StatusCode::UNAUTHORIZED, "INVALID_CODE"),
            (AuthError::TokenExpired, StatusCode::UNAUTHORIZED, "TOKEN_EXPIRED"),
            (
                AuthError::UnknownProvider("gitlab".to_string()),
                StatusCode::NOT_FOUND,
                "UNKNOWN_PROVIDER",
            ),
            (
                AuthError::CantCompleteAuth("denied".to_string()),
                StatusCode::BAD_REQUEST,
                "CANT_COMPLETE_AUTH",
            ),
            (
                AuthError::Persistence(StoreError::Conflict("dup".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
                "PERSISTENCE_ERROR",
            ),
        ];

        for (err, status, code) in cases {
            assert_eq!(ApiError::from(err).status_and_code(), (status, code));
        }
    }

    // ---- Hardening ----

    #[tokio::test]
    async fn test_missing_signing_key_rejects_empty_key_tokens() {
        let h = Harness::with_config(AuthConfig::default()).await;
        h.seed_user("victim").await;

        let now = Utc::now().timestamp();
        let forged = encode(
            &Header::default(),
            &Claims {
                user_id: "victim".to_string(),
                iat: now,
                nbf: now,
                exp: now + 3600,
            },
            &EncodingKey::from_secret(b""),
        )
        .unwrap();

        assert!(matches!(
            h.tokens().verify_access_token(&forged),
            Err(AuthError::TokenInvalidSignature)
        ));
        assert!(matches!(
            h.session.introspect(&forged).await,
            Err(AuthError::TokenInvalidSignature)
        ));
        assert!(matches!(
            h.session.renew(&forged).await,
            Err(AuthError::TokenInvalidSignature)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_refresh_spends_token_once() {
        let h = Harness::new().await;
        let tokens = h.local_login("a@b.com").await;
        let before = h.count("opaque_tokens").await;

        let (a, b) = tokio::join!(
            h.session.refresh(&tokens.refresh_token),
            h.session.refresh(&tokens.refresh_token)
        );

        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(loser, Err(AuthError::NotFound(_))));
        assert_eq!(h.count("opaque_tokens").await, before);
    }

    #[tokio::test]
    async fn test_renew_with_expired_access_cookie() {
        let h = Harness::new().await;
        h.session.begin_local("a@b.com").await.unwrap();

        let response = handlers::local_verify(
            Extension(h.state()),
            Json(LocalVerifyRequest {
                token: h.email.last_code_for("a@b.com"),
                email: "a@b.com".to_string(),
            }),
        )
        .await
        .unwrap();
        let access_cookie = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| cookie::Cookie::parse(v.to_str().unwrap().to_string()).ok())
            .find(|c| c.name() == "access_token")
            .unwrap();
        let max_age = access_cookie.max_age().unwrap().whole_seconds();
        assert!(max_age > h.config.access_token_ttl.num_seconds());

        // The browser still holds the cookie after the token inside it expired
        let expired = h.tokens().sign_claims(&expired_claims("a@b.com")).unwrap();
        let request = axum::http::Request::builder()
            .uri("/auth/renew")
            .header(COOKIE, format!("access_token={}", expired))
            .extension(h.state())
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();
        let bearer = extractors::BearerToken::from_request_parts(&mut parts, &())
            .await
            .unwrap();

        let response = handlers::renew(Extension(h.state()), bearer).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get_all(SET_COOKIE).iter().count(), 2);
    }

    #[tokio::test]
    async fn test_begin_federated_with_existing_session() {
        let h = Harness::new().await;
        let tokens = h.local_login("a@b.com").await;
        let authorize = BeginOutcome::Redirect("https://github.test/authorize".to_string());

        assert_eq!(
            h.session
                .begin_federated("github", &ctx(&[]), Some(&tokens.access_token))
                .await
                .unwrap(),
            BeginOutcome::AlreadyAuthenticated
        );

        // Callback parameters on the begin URL do not complete anything
        assert_eq!(
            h.session
                .begin_federated("github", &ctx(&[("code", "good")]), None)
                .await
                .unwrap(),
            authorize
        );
        assert_eq!(h.count("users").await, 1);

        let expired = h.tokens().sign_claims(&expired_claims("a@b.com")).unwrap();
        assert_eq!(
            h.session
                .begin_federated("github", &ctx(&[]), Some(&expired))
                .await
                .unwrap(),
            authorize
        );

        let response = handlers::begin_federated(
            Extension(h.state()),
            Path("github".to_string()),
            Query(HashMap::new()),
            Some(extractors::BearerToken(tokens.access_token)),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(LOCATION).unwrap(),
            "http://localhost:3000"
        );
    }
}
