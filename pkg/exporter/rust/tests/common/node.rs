// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! In-process node answering the query services over real gRPC.

use std::convert::Infallible;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use mne_exporter::query::proto;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::body::Body as GrpcBody;
use tonic::Status;
use tonic::codegen::{Body, BoxFuture, Service, StdError, http};
use tonic::server::{NamedService, UnaryService};
use tonic::transport::Server;
use tonic_prost::ProstCodec;

pub const HEIGHT: u64 = 42;
pub const VALIDATORS: [&str; 3] = [
    "manifestvaloper1a",
    "manifestvaloper1b",
    "manifestvaloper1c",
];
/// 2.5 umfx in 18-decimal fixed point.
pub const REWARD: &str = "2500000000000000000";
pub const FUNDED: &str = "manifest1funded";
pub const BALANCE: &str = "123";

const SECOND_PAGE: &[u8] = b"page-2";

/// What the node was asked.
#[derive(Default)]
pub struct Ledger {
    pub page_keys: Mutex<Vec<Vec<u8>>>,
}

pub trait Route {
    const NAME: &'static str;
}

pub struct NodeService;
pub struct StakingQuery;
pub struct DistributionQuery;
pub struct BankQuery;

impl Route for NodeService {
    const NAME: &'static str = "cosmos.base.node.v1beta1.Service";
}

impl Route for StakingQuery {
    const NAME: &'static str = "cosmos.staking.v1beta1.Query";
}

impl Route for DistributionQuery {
    const NAME: &'static str = "cosmos.distribution.v1beta1.Query";
}

impl Route for BankQuery {
    const NAME: &'static str = "cosmos.bank.v1beta1.Query";
}

/// One gRPC service of the node; every route shares the same handlers.
pub struct FakeNode<R> {
    ledger: Arc<Ledger>,
    _route: PhantomData<fn() -> R>,
}

impl<R> FakeNode<R> {
    fn new(ledger: &Arc<Ledger>) -> Self {
        Self {
            ledger: Arc::clone(ledger),
            _route: PhantomData,
        }
    }
}

impl<R> Clone for FakeNode<R> {
    fn clone(&self) -> Self {
        Self::new(&self.ledger)
    }
}

impl<R: Route> NamedService for FakeNode<R> {
    const NAME: &'static str = R::NAME;
}

struct Handler<F>(Option<F>);

impl<Req, Resp, F> UnaryService<Req> for Handler<F>
where
    F: FnOnce(Req) -> Result<Resp, Status>,
{
    type Response = Resp;
    type Future = std::future::Ready<Result<tonic::Response<Resp>, Status>>;

    fn call(&mut self, request: tonic::Request<Req>) -> Self::Future {
        let result = match self.0.take() {
            Some(handle) => handle(request.into_inner()).map(tonic::Response::new),
            None => Err(Status::internal("handler called twice")),
        };
        std::future::ready(result)
    }
}

async fn unary<Req, Resp, B, F>(request: http::Request<B>, handle: F) -> http::Response<GrpcBody>
where
    Req: prost::Message + Default + Send + 'static,
    Resp: prost::Message + Send + 'static,
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
    F: FnOnce(Req) -> Result<Resp, Status>,
{
    let mut grpc = tonic::server::Grpc::new(ProstCodec::<Resp, Req>::default());
    grpc.unary(Handler(Some(handle)), request).await
}

fn validators_page(
    request: proto::QueryValidatorsRequest,
    ledger: &Ledger,
) -> proto::QueryValidatorsResponse {
    let key = request.pagination.map(|page| page.key).unwrap_or_default();
    ledger.page_keys.lock().unwrap().push(key.clone());

    let (operators, next_key): (&[&str], &[u8]) = if key.is_empty() {
        (&VALIDATORS[..2], SECOND_PAGE)
    } else {
        (&VALIDATORS[2..], b"")
    };

    proto::QueryValidatorsResponse {
        validators: operators
            .iter()
            .map(|operator| proto::Validator {
                operator_address: operator.to_string(),
                jailed: false,
                status: 3,
            })
            .collect(),
        pagination: Some(proto::PageResponse {
            next_key: next_key.to_vec(),
            total: 0,
        }),
    }
}

impl<R, B> Service<http::Request<B>> for FakeNode<R>
where
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<GrpcBody>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<B>) -> Self::Future {
        let ledger = Arc::clone(&self.ledger);
        Box::pin(async move {
            let path = request.uri().path().to_string();
            let response = match path.as_str() {
                "/cosmos.base.node.v1beta1.Service/Status" => {
                    unary(request, |_: proto::StatusRequest| {
                        Ok(proto::StatusResponse {
                            height: HEIGHT,
                            ..Default::default()
                        })
                    })
                    .await
                }
                "/cosmos.staking.v1beta1.Query/Validators" => {
                    unary(request, |page: proto::QueryValidatorsRequest| {
                        Ok(validators_page(page, &ledger))
                    })
                    .await
                }
                "/cosmos.distribution.v1beta1.Query/ValidatorOutstandingRewards" => {
                    unary(
                        request,
                        |_: proto::QueryValidatorOutstandingRewardsRequest| {
                            Ok(proto::QueryValidatorOutstandingRewardsResponse {
                                rewards: Some(proto::ValidatorOutstandingRewards {
                                    rewards: vec![proto::DecCoin {
                                        denom: "umfx".to_string(),
                                        amount: REWARD.to_string(),
                                    }],
                                }),
                            })
                        },
                    )
                    .await
                }
                "/cosmos.bank.v1beta1.Query/Balance" => {
                    unary(request, |query: proto::QueryBalanceRequest| {
                        if query.address != FUNDED {
                            return Err(Status::not_found(format!(
                                "no account {}",
                                query.address
                            )));
                        }
                        Ok(proto::QueryBalanceResponse {
                            balance: Some(proto::Coin {
                                denom: query.denom,
                                amount: BALANCE.to_string(),
                            }),
                        })
                    })
                    .await
                }
                _ => Status::unimplemented(format!("unknown method {path}")).into_http(),
            };
            Ok(response)
        })
    }
}

/// Serve every query service on an ephemeral local port.
pub async fn start_node() -> (SocketAddr, Arc<Ledger>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let ledger = Arc::new(Ledger::default());

    let server = Server::builder()
        .add_service(FakeNode::<NodeService>::new(&ledger))
        .add_service(FakeNode::<StakingQuery>::new(&ledger))
        .add_service(FakeNode::<DistributionQuery>::new(&ledger))
        .add_service(FakeNode::<BankQuery>::new(&ledger))
        .serve_with_incoming(TcpListenerStream::new(listener));
    let handle = tokio::spawn(async move {
        let _ = server.await;
    });

    (addr, ledger, handle)
}

/// A port that accepts connections and never answers.
pub async fn start_silent() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    (addr, handle)
}
