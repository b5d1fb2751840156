use anyhow::{bail, Context};

/// Thin REST client used by the wallet CLI to talk to a running node.
pub struct NodeClient {
    base: String,
    http: reqwest::Client,
}

impl NodeClient {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    async fn get(&self, path: &str) -> anyhow::Result<serde_json::Value> {
        let url = format!("{}{}", self.base, path);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("connecting to node at {url}"))?;
        let status = resp.status();
        let json: serde_json::Value = resp.json().await.context("parsing node response")?;
        if !status.is_success() {
            bail!("node error {}: {}", status, json["error"].as_str().unwrap_or("?"));
        }
        Ok(json)
    }

    async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
        bearer: Option<&str>,
    ) -> anyhow::Result<serde_json::Value> {
        let url = format!("{}{}", self.base, path);
        let mut req = self.http.post(&url).json(&body);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("connecting to node at {url}"))?;
        let status = resp.status();
        let json: serde_json::Value = resp.json().await.context("parsing node response")?;
        if !status.is_success() {
            bail!("node error {}: {}", status, json["error"].as_str().unwrap_or("?"));
        }
        Ok(json)
    }

    pub async fn health(&self) -> anyhow::Result<serde_json::Value> {
        self.get("/v1.1/health").await
    }

    pub async fn balance(&self, entity_id: &str) -> anyhow::Result<u64> {
        let json = self.get(&format!("/token/balance/{entity_id}")).await?;
        json["balance"]
            .as_u64()
            .context("balance field missing in response")
    }

    pub async fn transfer(
        &self,
        token: &str,
        from: &str,
        to: &str,
        amount: u64,
        description: &str,
    ) -> anyhow::Result<()> {
        self.post(
            "/economy/transfer",
            serde_json::json!({
                "from_entity": from,
                "to_entity": to,
                "amount": amount,
                "description": description,
            }),
            Some(token),
        )
        .await?;
        Ok(())
    }

    pub async fn supply(&self) -> anyhow::Result<serde_json::Value> {
        self.get("/economy/supply").await
    }

    pub async fn services(&self) -> anyhow::Result<serde_json::Value> {
        self.get("/marketplace/services").await
    }

    pub async fn tasks(&self) -> anyhow::Result<serde_json::Value> {
        self.get("/marketplace/tasks").await
    }

    pub async fn create_task(
        &self,
        creator: &str,
        description: &str,
        reward: u64,
    ) -> anyhow::Result<serde_json::Value> {
        self.post(
            "/marketplace/tasks",
            serde_json::json!({
                "creator_id": creator,
                "description": description,
                "reward_amount": reward,
            }),
            None,
        )
        .await
    }

    pub async fn reputation(&self, entity_id: &str) -> anyhow::Result<serde_json::Value> {
        self.get(&format!("/reputation/{entity_id}")).await
    }
}
