use std::time::Duration;

use reqwest::StatusCode;

use crate::models::{Id, Route, RouteAssignment, Symbol, Truck};

use super::{AssignRouteRequest, GatewayError, Result, RouteDecisionRequest, SyncGateway};

crate::conf_env!(static GATEWAY_TIMEOUT_MS: u64 = {
    from: "GATEWAY_TIMEOUT_MS",
    default: "10000",
});

/// JSON-over-HTTP client for the route service.
#[derive(Debug, Clone)]
pub struct HttpSyncGateway {
    client: reqwest::Client,
    base_url: Symbol,
}

impl HttpSyncGateway {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(*GATEWAY_TIMEOUT_MS))
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: Symbol::new_from_ref(base_url.trim_end_matches('/')),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.resolve())
    }
}

/// Map a non-success status onto the contract's outcomes. `not_found` names
/// what a 404 means for this endpoint.
fn check(res: reqwest::Response, not_found: &'static str) -> Result<reqwest::Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let e = match status {
        StatusCode::NOT_FOUND => GatewayError::NotFound(not_found),
        StatusCode::CONFLICT => GatewayError::Conflict,
        StatusCode::PRECONDITION_FAILED => GatewayError::StaleVersion,
        s => GatewayError::Status(s),
    };
    tracing::debug!("{} -> {status}", res.url().path());
    Err(e)
}

impl SyncGateway for HttpSyncGateway {
    async fn fetch_assigned_route(&self, truck_id: Id<Truck>) -> Result<RouteAssignment> {
        let res = self
            .client
            .get(self.url(&format!("/trucks/{truck_id}/route-assignment")))
            .send()
            .await?;
        Ok(check(res, "no route assigned to truck")?.json().await?)
    }

    async fn assign_route(&self, req: &AssignRouteRequest) -> Result<RouteAssignment> {
        let res = self
            .client
            .post(self.url("/route-assignments"))
            .json(req)
            .send()
            .await?;
        Ok(check(res, "route not found")?.json().await?)
    }

    async fn accept_route(&self, req: &RouteDecisionRequest) -> Result<RouteAssignment> {
        let res = self
            .client
            .post(self.url("/route-assignments/accept"))
            .json(req)
            .send()
            .await?;
        Ok(check(res, "no such assignment")?.json().await?)
    }

    async fn decline_route(&self, req: &RouteDecisionRequest) -> Result<()> {
        let res = self
            .client
            .post(self.url("/route-assignments/decline"))
            .json(req)
            .send()
            .await?;
        check(res, "no such assignment")?;
        Ok(())
    }

    async fn complete_route(&self, route_id: Id<Route>, idempotency_key: &str) -> Result<()> {
        let res = self
            .client
            .post(self.url(&format!("/routes/{route_id}/complete")))
            .header("Idempotency-Key", idempotency_key)
            .send()
            .await?;
        match check(res, "route not found") {
            Ok(_) => Ok(()),
            // completing an unknown route is an ack
            Err(GatewayError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn fetch_directions(&self, route_id: Id<Route>) -> Result<Route> {
        let res = self
            .client
            .get(self.url(&format!("/routes/{route_id}/directions")))
            .send()
            .await?;
        Ok(check(res, "route not found")?.json().await?)
    }
}
