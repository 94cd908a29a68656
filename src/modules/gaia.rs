// Gaia session transport
//
// reqwest implementation of `SessionTransport`. The client's cookie store is
// the shared web session; every call here reads or mutates it.

use async_trait::async_trait;

use crate::models::GaiaEndpoints;
use crate::reconcilor::services::{SessionTransport, TransportError, UserInfo};

pub struct HttpSessionTransport {
    client: reqwest::Client,
    endpoints: GaiaEndpoints,
}

impl HttpSessionTransport {
    pub fn new(client: reqwest::Client, endpoints: GaiaEndpoints) -> Self {
        Self { client, endpoints }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl SessionTransport for HttpSessionTransport {
    async fn list_accounts(&self) -> Result<String, TransportError> {
        let response = self
            .client
            .get(&self.endpoints.list_accounts_url)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.text().await?)
    }

    async fn user_info(&self, access_token: &str) -> Result<UserInfo, TransportError> {
        let response = self
            .client
            .get(&self.endpoints.user_info_url)
            .bearer_auth(access_token)
            .send()
            .await?;
        let response = check_status(response).await?;
        response
            .json::<UserInfo>()
            .await
            .map_err(|e| TransportError::Malformed(e.to_string()))
    }

    async fn merge_session(&self, access_token: &str) -> Result<(), TransportError> {
        let response = self
            .client
            .post(&self.endpoints.merge_session_url)
            .bearer_auth(access_token)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn logout(&self) -> Result<(), TransportError> {
        let response = self.client.get(&self.endpoints.logout_url).send().await?;
        check_status(response).await?;
        Ok(())
    }
}
