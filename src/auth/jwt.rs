use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct JwtService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    expiry: Duration,
}

impl JwtService {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
            expiry: Duration::minutes(config.jwt_expiry_minutes),
        })
    }

    pub fn generate_token(&self, user_id: Uuid, username: &str, role: &str) -> Result<String> {
        let now = Utc::now();
        let exp = now + self.expiry;
        let claims = Claims {
            sub: user_id,
            username: username.to_owned(),
            role: role.to_owned(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp() as usize,
            exp: exp.timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(&[self.audience.clone()]);
        validation.set_issuer(&[self.issuer.clone()]);
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub role: String,
    pub iss: String,
    pub aud: String,
    pub iat: usize,
    pub exp: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> JwtService {
        let config = AppConfig {
            database_url: "postgres://localhost/quickdesk".into(),
            database_max_pool_size: 1,
            server_host: "127.0.0.1".into(),
            server_port: 0,
            jwt_secret: "unit-test-secret".into(),
            jwt_issuer: "quickdesk".into(),
            jwt_audience: "quickdesk-clients".into(),
            jwt_expiry_minutes: 60,
            cors_allowed_origin: None,
            aws_endpoint_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: "us-east-1".into(),
            s3_bucket: "bucket".into(),
            mail_smtp_host: None,
            mail_username: None,
            mail_password: None,
            mail_default_sender: "noreply@quickdesk.com".into(),
        };
        JwtService::from_config(&config).expect("jwt service")
    }

    #[test]
    fn round_trips_claims() {
        let service = service();
        let user_id = Uuid::new_v4();
        let token = service
            .generate_token(user_id, "agent_smith", "agent")
            .expect("token");
        let claims = service.verify_token(&token).expect("claims");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.username, "agent_smith");
        assert_eq!(claims.role, "agent");
    }

    #[test]
    fn rejects_tampered_token() {
        let service = service();
        let token = service
            .generate_token(Uuid::new_v4(), "agent_smith", "agent")
            .expect("token");
        let mut tampered = token.clone();
        tampered.push('x');
        assert!(service.verify_token(&tampered).is_err());
    }
}
