//! Api service integration: echo request/reply, unknown msg id, handler
//! error mapping.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use playhouse_api::config::ApiConfig;
use playhouse_api::error::ApiError;
use playhouse_api::handler::HandlerRegistry;
use playhouse_api::service::ApiService;
use playhouse_comm::communicator::Communicator;
use playhouse_comm::config::CommConfig;
use playhouse_comm::discovery::{ServerInfo, ServerInfoProvider, ServiceType};
use playhouse_comm::error::{CommError, ErrorCode};
use playhouse_comm::packet::{Packet, Payload, RouteHeader};

#[derive(Clone, Default)]
struct SharedBackend {
    servers: Arc<Mutex<HashMap<String, ServerInfo>>>,
}

#[async_trait]
impl ServerInfoProvider for SharedBackend {
    async fn update_server_info(
        &self,
        self_info: ServerInfo,
    ) -> Result<Vec<ServerInfo>, CommError> {
        let mut servers = self.servers.lock();
        servers.insert(self_info.nid(), self_info);
        Ok(servers.values().cloned().collect())
    }
}

fn mesh_config(service_type: ServiceType, service_id: u16, server_id: &str) -> CommConfig {
    CommConfig::builder(service_type, service_id, server_id)
        .with_bind_endpoint("127.0.0.1:0")
        .with_discovery_interval(Duration::from_millis(50))
        .build()
        .unwrap()
}

async fn start_api_and_caller() -> (ApiService, Arc<Communicator>) {
    let backend = SharedBackend::default();

    let registry = HandlerRegistry::new()
        .register("EchoRequest", |packet: Packet, sender| async move {
            sender
                .reply(Packet::with_payload("EchoReply", packet.payload().clone()))
                .await?;
            Ok(())
        })
        .register("Exploding", |_packet: Packet, _sender| async move {
            Err(ApiError::Handler("boom".to_string()))
        })
        .register("SilentOk", |_packet: Packet, _sender| async move { Ok(()) });

    let api = ApiService::start(
        ApiConfig::new(mesh_config(ServiceType::Api, 2, "api-1")),
        Arc::new(backend.clone()),
        registry,
    )
    .await
    .expect("api service starts");

    let caller = Communicator::start(
        mesh_config(ServiceType::Session, 3, "session-1"),
        Arc::new(backend),
    )
    .await
    .expect("caller starts");

    let deadline = Instant::now() + Duration::from_secs(3);
    while caller.center().find_by_nid("2:api-1").is_none() {
        assert!(Instant::now() < deadline, "api server never discovered");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    (api, caller)
}

async fn call(caller: &Communicator, msg_id: &str, payload: Payload) -> (u16, String, Payload) {
    let header = RouteHeader::to(ServiceType::Api, 2, "2:api-1", msg_id);
    let reply = caller
        .request(header, payload)
        .await
        .expect("request registers")
        .await
        .expect("reply arrives");
    (
        reply.header.error_code,
        reply.header.msg_id.clone(),
        reply.payload,
    )
}

#[tokio::test]
async fn echo_request_reply() {
    let (api, caller) = start_api_and_caller().await;

    let (code, msg_id, payload) = call(&caller, "EchoRequest", Payload::from("hi")).await;
    assert_eq!(code, 0);
    assert_eq!(msg_id, "EchoReply");
    assert_eq!(payload.as_slice(), b"hi");

    caller.shutdown().await;
    api.shutdown().await;
}

#[tokio::test]
async fn unknown_msg_id_answers_handler_not_found() {
    let (api, caller) = start_api_and_caller().await;

    let (code, _, _) = call(&caller, "Nope", Payload::empty()).await;
    assert_eq!(code, ErrorCode::HandlerNotFound.as_u16());

    caller.shutdown().await;
    api.shutdown().await;
}

#[tokio::test]
async fn handler_error_maps_to_unchecked_contents() {
    let (api, caller) = start_api_and_caller().await;

    let (code, _, _) = call(&caller, "Exploding", Payload::empty()).await;
    assert_eq!(code, ErrorCode::UncheckedContentsError.as_u16());

    caller.shutdown().await;
    api.shutdown().await;
}

#[tokio::test]
async fn silent_handler_still_acknowledges() {
    let (api, caller) = start_api_and_caller().await;

    let (code, msg_id, payload) = call(&caller, "SilentOk", Payload::empty()).await;
    assert_eq!(code, 0);
    assert_eq!(msg_id, "SilentOk");
    assert!(payload.is_empty());

    caller.shutdown().await;
    api.shutdown().await;
}
