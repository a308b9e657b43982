use super::{bridge_login, StaffUser, SESSION_TOKEN, SESSION_USER, SESSION_USERNAME};
use crate::control::{render_template, see_other, Response};
use actix_session::Session;
use actix_web::{
    get, post,
    web::{Data, Form},
};
use anyhow::Context as AnyhowContext;
use askama::Template;
use catalog_api::Connector;
use serde::Deserialize;

#[derive(Deserialize)]
pub struct LoginDto {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Template)]
#[template(path = "login.html")]
struct LoginPage {
    error: Option<&'static str>,
    username: String,
    user: Option<StaffUser>,
}

#[get("/login")]
pub async fn login_page() -> Response {
    render_template(LoginPage {
        error: None,
        username: String::new(),
        user: None,
    })
}

/// Exchanges credentials for an API token and starts a staff session.
#[post("/login")]
pub async fn log_in(
    form: Form<LoginDto>,
    session: Session,
    connector: Data<dyn Connector>,
) -> Response {
    let username = form.username.trim().to_string();
    let password = form.password.as_str();
    let rejected = |error| {
        render_template(LoginPage {
            error: Some(error),
            username: username.clone(),
            user: None,
        })
    };
    if username.is_empty() || password.is_empty() {
        return rejected("Username and password are required.");
    }
    let token = match connector.authenticate(&username, password).await {
        Ok(token) => token,
        Err(err) => {
            log::info!("Login failed for {username}: {err}");
            return rejected("Invalid credentials. Please try again.");
        }
    };
    session.renew();
    session
        .insert(SESSION_TOKEN, &token)
        .context("Unable to insert token into session")?;
    session
        .insert(SESSION_USERNAME, &username)
        .context("Unable to insert username into session")?;
    session
        .insert(SESSION_USER, bridge_login(&username))
        .context("Unable to insert user into session")?;
    log::info!("{username} signed in");
    Ok(see_other("/"))
}

#[get("/logout")]
pub async fn log_out(session: Session) -> Response {
    session.purge();
    Ok(see_other("/login"))
}

#[derive(Template)]
#[template(path = "no_access.html")]
struct NoAccessPage {
    user: Option<StaffUser>,
}

#[get("/no-access")]
pub async fn no_access() -> Response {
    render_template(NoAccessPage { user: None })
}

#[cfg(test)]
mod tests {
    use crate::access::SESSION_TOKEN;
    use crate::testing::*;
    use actix_web::{http::StatusCode, test};

    #[actix_web::test]
    async fn login_requires_both_fields() {
        let env = TestEnv::new();
        let app = test::init_service(env.app()).await;
        let res = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/login")
                .set_form([("username", "  "), ("password", "secret")])
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(body_text(res)
            .await
            .contains("Username and password are required."));
    }

    #[actix_web::test]
    async fn bad_password_is_rejected() {
        let env = TestEnv::new();
        let app = test::init_service(env.app()).await;
        let res = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/login")
                .set_form([("username", "alice"), ("password", "wrong")])
                .to_request(),
        )
        .await;
        assert!(session_cookie(&res).is_none());
        assert!(body_text(res)
            .await
            .contains("Invalid credentials. Please try again."));
    }

    #[actix_web::test]
    async fn logout_ends_the_session() {
        let env = TestEnv::new();
        let app = test::init_service(env.app()).await;
        let cookie = login(&app).await;
        let res = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/logout")
                .cookie(cookie)
                .to_request(),
        )
        .await;
        assert_eq!(location(&res), "/login");
        let cleared = session_cookie(&res).expect("removal cookie");
        let res = test::call_service(
            &app,
            test::TestRequest::get().uri("/").cookie(cleared).to_request(),
        )
        .await;
        assert_eq!(location(&res), "/login");
    }

    #[actix_web::test]
    async fn legacy_session_is_bridged() {
        let env = TestEnv::new();
        let app = test::init_service(env.app()).await;
        let cookie = session_with(&app, &[
            (SESSION_TOKEN, serde_json::to_value(FakeConnector::token(time::Duration::hours(1))).expect("token")),
            ("username", serde_json::json!("carol")),
        ])
        .await;
        let res = test::call_service(&app, test::TestRequest::get().uri("/").cookie(cookie).to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn token_without_username_is_flushed() {
        let env = TestEnv::new();
        let app = test::init_service(env.app()).await;
        let cookie = session_with(&app, &[(
            SESSION_TOKEN,
            serde_json::to_value(FakeConnector::token(time::Duration::hours(1))).expect("token"),
        )])
        .await;
        let res = test::call_service(&app, test::TestRequest::get().uri("/").cookie(cookie).to_request()).await;
        assert_eq!(location(&res), "/login");
    }

    #[actix_web::test]
    async fn expired_token_is_refreshed() {
        let env = TestEnv::new();
        let app = test::init_service(env.app()).await;
        let cookie = session_with(&app, &[
            (SESSION_TOKEN, serde_json::to_value(FakeConnector::token(time::Duration::hours(-1))).expect("token")),
            ("username", serde_json::json!("dave")),
        ])
        .await;
        let res = test::call_service(&app, test::TestRequest::get().uri("/").cookie(cookie).to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(env
            .connector
            .refreshed
            .load(std::sync::atomic::Ordering::SeqCst));
    }

    #[actix_web::test]
    async fn non_staff_goes_to_no_access() {
        let env = TestEnv::new();
        let app = test::init_service(env.app()).await;
        let cookie = session_with(&app, &[
            (SESSION_TOKEN, serde_json::to_value(FakeConnector::token(time::Duration::hours(1))).expect("token")),
            ("user", serde_json::json!({"username": "eve", "is_staff": false})),
        ])
        .await;
        let res = test::call_service(&app, test::TestRequest::get().uri("/").cookie(cookie).to_request()).await;
        assert_eq!(location(&res), "/no-access");
    }
}
