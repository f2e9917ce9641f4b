/// JWT Authentication Middleware
///
/// Validates the access token from the Authorization header and injects its
/// claims into request extensions for use by route handlers.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage, HttpResponse,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;
use std::sync::Arc;

use crate::auth::{AccessClaims, TokenCodec};

/// Guards routes that require a valid access token
pub struct JwtMiddleware {
    codec: Arc<TokenCodec>,
}

impl JwtMiddleware {
    pub fn new(codec: Arc<TokenCodec>) -> Self {
        Self { codec }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = JwtMiddlewareService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(JwtMiddlewareService {
            service: Rc::new(service),
            codec: self.codec.clone(),
        }))
    }
}

pub struct JwtMiddlewareService<S> {
    service: Rc<S>,
    codec: Arc<TokenCodec>,
}

/// Extract the token from `Authorization: Bearer <token>`
pub fn bearer_token(req: &ServiceRequest) -> Option<String> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn unauthorized(code: &'static str, message: &'static str) -> Error {
    let response = HttpResponse::Unauthorized().json(serde_json::json!({
        "message": message,
        "code": code
    }));
    actix_web::error::InternalError::from_response(message, response).into()
}

impl<S, B> Service<ServiceRequest> for JwtMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let Some(token) = bearer_token(&req) else {
            tracing::warn!(path = %req.path(), "Missing or malformed Authorization header");
            return Box::pin(async move {
                Err(unauthorized("UNAUTHORIZED", "Missing or invalid authorization header"))
            });
        };

        match self.codec.verify::<AccessClaims>(&token) {
            Ok(claims) => {
                tracing::debug!(principal_id = %claims.sub, "Access token validated");
                req.extensions_mut().insert(claims);

                let service = self.service.clone();
                Box::pin(async move { service.call(req).await })
            }
            Err(e) => {
                tracing::warn!(reason = e.as_str(), "Access token rejected");
                Box::pin(async move { Err(unauthorized("REAUTHENTICATE", "Re-authentication required")) })
            }
        }
    }
}
