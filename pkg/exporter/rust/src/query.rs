// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Typed request/response calls against a node's query services.

use std::time::Duration;

use async_trait::async_trait;
use log::trace;
use tonic::codegen::http::uri::PathAndQuery;
use tonic_prost::ProstCodec;

use crate::connection::Connection;
use crate::errors::QueryError;

pub use proto::{Coin, DecCoin, StatusResponse, Validator};

/// Message types of the node query services, limited to the fields read here.
pub mod proto {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct StatusRequest {}

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct StatusResponse {
        #[prost(uint64, tag = "1")]
        pub earliest_store_height: u64,
        #[prost(uint64, tag = "2")]
        pub height: u64,
        #[prost(message, optional, tag = "3")]
        pub timestamp: Option<prost_types::Timestamp>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct PageRequest {
        #[prost(bytes = "vec", tag = "1")]
        pub key: Vec<u8>,
        #[prost(uint64, tag = "2")]
        pub offset: u64,
        #[prost(uint64, tag = "3")]
        pub limit: u64,
        #[prost(bool, tag = "4")]
        pub count_total: bool,
        #[prost(bool, tag = "5")]
        pub reverse: bool,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct PageResponse {
        #[prost(bytes = "vec", tag = "1")]
        pub next_key: Vec<u8>,
        #[prost(uint64, tag = "2")]
        pub total: u64,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct QueryValidatorsRequest {
        #[prost(string, tag = "1")]
        pub status: String,
        #[prost(message, optional, tag = "2")]
        pub pagination: Option<PageRequest>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct QueryValidatorsResponse {
        #[prost(message, repeated, tag = "1")]
        pub validators: Vec<Validator>,
        #[prost(message, optional, tag = "2")]
        pub pagination: Option<PageResponse>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Validator {
        #[prost(string, tag = "1")]
        pub operator_address: String,
        #[prost(bool, tag = "3")]
        pub jailed: bool,
        #[prost(int32, tag = "4")]
        pub status: i32,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct QueryValidatorOutstandingRewardsRequest {
        #[prost(string, tag = "1")]
        pub validator_address: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct QueryValidatorOutstandingRewardsResponse {
        #[prost(message, optional, tag = "1")]
        pub rewards: Option<ValidatorOutstandingRewards>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ValidatorOutstandingRewards {
        #[prost(message, repeated, tag = "1")]
        pub rewards: Vec<DecCoin>,
    }

    /// Coin whose amount is an 18-decimal fixed-point integer.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct DecCoin {
        #[prost(string, tag = "1")]
        pub denom: String,
        #[prost(string, tag = "2")]
        pub amount: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct QueryBalanceRequest {
        #[prost(string, tag = "1")]
        pub address: String,
        #[prost(string, tag = "2")]
        pub denom: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct QueryBalanceResponse {
        #[prost(message, optional, tag = "1")]
        pub balance: Option<Coin>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Coin {
        #[prost(string, tag = "1")]
        pub denom: String,
        #[prost(string, tag = "2")]
        pub amount: String,
    }
}

const NODE_STATUS: &str = "/cosmos.base.node.v1beta1.Service/Status";
const STAKING_VALIDATORS: &str = "/cosmos.staking.v1beta1.Query/Validators";
const DISTRIBUTION_OUTSTANDING_REWARDS: &str =
    "/cosmos.distribution.v1beta1.Query/ValidatorOutstandingRewards";
const BANK_BALANCE: &str = "/cosmos.bank.v1beta1.Query/Balance";

/// Upper bound on pages followed for one listing.
const MAX_PAGES: usize = 1000;

/// Remote query contract the collectors depend on.
#[async_trait]
pub trait QueryClient: Send + Sync {
    async fn node_status(&self) -> Result<StatusResponse, QueryError>;

    /// Every validator, following pagination to the end.
    async fn validators(&self) -> Result<Vec<Validator>, QueryError>;

    async fn validator_outstanding_rewards(
        &self,
        validator_address: &str,
    ) -> Result<Vec<DecCoin>, QueryError>;

    async fn balance(&self, address: &str, denom: &str) -> Result<Coin, QueryError>;
}

/// [`QueryClient`] over a shared gRPC [`Connection`].
pub struct GrpcQueryClient {
    connection: Connection,
    timeout: Duration,
}

impl GrpcQueryClient {
    pub fn new(connection: Connection, timeout: Duration) -> Self {
        Self {
            connection,
            timeout,
        }
    }

    async fn unary<Req, Resp>(&self, path: &'static str, message: Req) -> Result<Resp, QueryError>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        trace!("Calling {path} on {}", self.connection.target());

        let mut grpc = tonic::client::Grpc::new(self.connection.channel());
        let call = async {
            grpc.ready()
                .await
                .map_err(|e| tonic::Status::unknown(format!("service was not ready: {e}")))?;

            let mut request = tonic::Request::new(message);
            request.set_timeout(self.timeout);

            let response = grpc
                .unary(
                    request,
                    PathAndQuery::from_static(path),
                    ProstCodec::<Req, Resp>::default(),
                )
                .await?;
            Ok::<_, QueryError>(response.into_inner())
        };

        tokio::select! {
            _ = self.connection.token().cancelled() => Err(QueryError::Cancelled),
            result = tokio::time::timeout(self.timeout, call) => {
                result.map_err(|_| QueryError::Timeout(self.timeout))?
            }
        }
    }
}

#[async_trait]
impl QueryClient for GrpcQueryClient {
    async fn node_status(&self) -> Result<StatusResponse, QueryError> {
        self.unary(NODE_STATUS, proto::StatusRequest {}).await
    }

    async fn validators(&self) -> Result<Vec<Validator>, QueryError> {
        let mut validators = Vec::new();
        let mut key = Vec::new();

        for _ in 0..MAX_PAGES {
            let request = proto::QueryValidatorsRequest {
                status: String::new(),
                pagination: Some(proto::PageRequest {
                    key: key.clone(),
                    ..Default::default()
                }),
            };
            let response: proto::QueryValidatorsResponse =
                self.unary(STAKING_VALIDATORS, request).await?;
            validators.extend(response.validators);

            let next_key = response
                .pagination
                .map(|page| page.next_key)
                .unwrap_or_default();
            if next_key.is_empty() {
                return Ok(validators);
            }
            if next_key == key {
                return Err(QueryError::Malformed(
                    "validators pagination did not advance".to_string(),
                ));
            }
            key = next_key;
        }

        Err(QueryError::Malformed(format!(
            "validators listing exceeded {MAX_PAGES} pages"
        )))
    }

    async fn validator_outstanding_rewards(
        &self,
        validator_address: &str,
    ) -> Result<Vec<DecCoin>, QueryError> {
        let request = proto::QueryValidatorOutstandingRewardsRequest {
            validator_address: validator_address.to_string(),
        };
        let response: proto::QueryValidatorOutstandingRewardsResponse =
            self.unary(DISTRIBUTION_OUTSTANDING_REWARDS, request).await?;

        response
            .rewards
            .map(|rewards| rewards.rewards)
            .ok_or_else(|| QueryError::Malformed("outstanding rewards missing".to_string()))
    }

    async fn balance(&self, address: &str, denom: &str) -> Result<Coin, QueryError> {
        let request = proto::QueryBalanceRequest {
            address: address.to_string(),
            denom: denom.to_string(),
        };
        let response: proto::QueryBalanceResponse = self.unary(BANK_BALANCE, request).await?;

        response
            .balance
            .ok_or_else(|| QueryError::Malformed("balance missing".to_string()))
    }
}
