// Bearer-token guard for everything outside the health routes

use actix_web::{
    body::{BoxBody, EitherBody},
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpResponse,
};
use futures::future::LocalBoxFuture;
use std::future::{ready, Ready};

use crate::api::models::ApiResponse;

/// Authentication middleware that validates Bearer tokens
pub struct Auth {
    secret: String,
}

impl Auth {
    pub fn new(secret: String) -> Self {
        Self { secret }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Auth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B, BoxBody>>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthMiddleware {
            service,
            secret: self.secret.clone(),
        }))
    }
}

pub struct AuthMiddleware<S> {
    service: S,
    secret: String,
}

fn is_public(path: &str) -> bool {
    path == "/health" || path == "/"
}

fn bearer_matches(header: Option<&str>, secret: &str) -> bool {
    match header.and_then(|h| h.strip_prefix("Bearer ")) {
        Some(token) => !secret.is_empty() && token.trim() == secret,
        None => false,
    }
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B, BoxBody>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let authorized = is_public(req.path())
            || bearer_matches(
                req.headers()
                    .get("Authorization")
                    .and_then(|h| h.to_str().ok()),
                &self.secret,
            );

        if authorized {
            let fut = self.service.call(req);
            return Box::pin(async move {
                let res = fut.await?;
                Ok(res.map_into_left_body())
            });
        }

        Box::pin(async move {
            let response = HttpResponse::Unauthorized()
                .json(ApiResponse::<()>::error(
                    "Invalid or missing authentication token",
                ))
                .map_into_right_body();
            Ok(req.into_response(response))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{
        http::StatusCode,
        test::{call_service, init_service, TestRequest},
        web, App,
    };

    async fn ok() -> HttpResponse {
        HttpResponse::Ok().finish()
    }

    #[test]
    fn bearer_check() {
        assert!(bearer_matches(Some("Bearer s3cret"), "s3cret"));
        assert!(!bearer_matches(Some("Bearer wrong"), "s3cret"));
        assert!(!bearer_matches(Some("s3cret"), "s3cret"));
        assert!(!bearer_matches(None, "s3cret"));
        assert!(!bearer_matches(Some("Bearer "), ""));
    }

    #[actix_web::test]
    async fn rejects_missing_token_but_serves_health() {
        let app = init_service(
            App::new()
                .wrap(Auth::new("s3cret".into()))
                .route("/health", web::get().to(ok))
                .route("/api/v1/jobs", web::get().to(ok)),
        )
        .await;

        let res = call_service(&app, TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);

        let res =
            call_service(&app, TestRequest::get().uri("/api/v1/jobs").to_request()).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let req = TestRequest::get()
            .uri("/api/v1/jobs")
            .insert_header(("Authorization", "Bearer s3cret"))
            .to_request();
        let res = call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
    }
}
