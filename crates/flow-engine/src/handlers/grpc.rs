//! gRPC action handlers: `grpc_unary` and `grpc_stream`, built directly on
//! `tonic`'s low-level `Grpc` client rather than generated service stubs,
//! since the set of services a flow calls is only known at flow-document
//! load time. Payloads are carried as JSON rather than a fixed `.proto`
//! schema — a raw-bytes passthrough codec framed the way `tonic` expects.
//!
//! Config shape: `{ endpoint, path, request, timeout_ms? }` where `path`
//! is the fully-qualified gRPC method path (`/pkg.Service/Method`).

use crate::context::ExecutionContext;
use crate::registry::ActionHandler;
use async_trait::async_trait;
use bytes::{Buf, BufMut};
use flow_core::model::StepResult;
use flow_core::value::Value;
use std::time::{Duration, Instant};
use tonic::client::Grpc;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::transport::Channel;
use tonic::Status;
use tokio_util::sync::CancellationToken;

#[derive(Default, Clone, Copy)]
struct JsonCodec;

#[derive(Default, Clone, Copy)]
struct JsonEncoder;

#[derive(Default, Clone, Copy)]
struct JsonDecoder;

impl Encoder for JsonEncoder {
    type Item = Value;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Status> {
        let bytes = serde_json::to_vec(&item.to_json()).map_err(|e| Status::internal(e.to_string()))?;
        dst.put_slice(&bytes);
        Ok(())
    }
}

impl Decoder for JsonDecoder {
    type Item = Value;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Status> {
        if !src.has_remaining() {
            return Ok(None);
        }
        let mut bytes = vec![0u8; src.remaining()];
        src.copy_to_slice(&mut bytes);
        let parsed = serde_json::from_slice::<serde_json::Value>(&bytes).map_err(|e| Status::internal(e.to_string()))?;
        Ok(Some(Value::from_json(parsed)))
    }
}

impl Codec for JsonCodec {
    type Encode = Value;
    type Decode = Value;
    type Encoder = JsonEncoder;
    type Decoder = JsonDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        JsonEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        JsonDecoder
    }
}

async fn connect(endpoint: &str) -> Result<Grpc<Channel>, String> {
    let channel = Channel::from_shared(endpoint.to_string()).map_err(|e| e.to_string())?.connect().await.map_err(|e| e.to_string())?;
    Ok(Grpc::new(channel))
}

fn method_path(path: &str) -> Result<tonic::codegen::http::uri::PathAndQuery, String> {
    path.parse().map_err(|e: tonic::codegen::http::uri::InvalidUri| e.to_string())
}

pub struct GrpcUnaryHandler;

#[async_trait]
impl ActionHandler for GrpcUnaryHandler {
    async fn execute(&self, config: &Value, _context: &ExecutionContext, cancel: CancellationToken) -> StepResult {
        let started = Instant::now();
        let Some(endpoint) = config.get_path("endpoint").map(|v| v.as_display_string()) else {
            return StepResult::failed("grpc_unary requires 'endpoint'", started.elapsed().as_millis() as u64, 0);
        };
        let Some(path) = config.get_path("path").map(|v| v.as_display_string()) else {
            return StepResult::failed("grpc_unary requires 'path'", started.elapsed().as_millis() as u64, 0);
        };
        let request = config.get_path("request").cloned().unwrap_or(Value::Null);
        let timeout_ms = config.get_path("timeout_ms").and_then(|v| v.as_f64()).unwrap_or(10_000.0) as u64;

        let mut grpc = match connect(&endpoint).await {
            Ok(g) => g,
            Err(e) => return StepResult::failed(format!("grpc connect failed: {}", e), started.elapsed().as_millis() as u64, 0),
        };
        let path = match method_path(&path) {
            Ok(p) => p,
            Err(e) => return StepResult::failed(format!("invalid grpc method path: {}", e), started.elapsed().as_millis() as u64, 0),
        };

        let call = async {
            grpc.ready().await.map_err(|e| e.to_string())?;
            grpc.unary(tonic::Request::new(request), path, JsonCodec).await.map_err(|e| e.to_string())
        };

        let outcome = tokio::select! {
            r = tokio::time::timeout(Duration::from_millis(timeout_ms), call) => r,
            _ = cancel.cancelled() => return StepResult::cancelled(),
        };

        match outcome {
            Ok(Ok(response)) => StepResult::passed(response.into_inner(), started.elapsed().as_millis() as u64, 0),
            Ok(Err(e)) => StepResult::failed(format!("grpc call failed: {}", e), started.elapsed().as_millis() as u64, 0),
            Err(_) => StepResult::failed("timeout waiting for grpc response", started.elapsed().as_millis() as u64, 0),
        }
    }

    fn name(&self) -> &'static str {
        "grpc_unary"
    }
}

pub struct GrpcStreamHandler;

#[async_trait]
impl ActionHandler for GrpcStreamHandler {
    async fn execute(&self, config: &Value, _context: &ExecutionContext, cancel: CancellationToken) -> StepResult {
        let started = Instant::now();
        let Some(endpoint) = config.get_path("endpoint").map(|v| v.as_display_string()) else {
            return StepResult::failed("grpc_stream requires 'endpoint'", started.elapsed().as_millis() as u64, 0);
        };
        let Some(path) = config.get_path("path").map(|v| v.as_display_string()) else {
            return StepResult::failed("grpc_stream requires 'path'", started.elapsed().as_millis() as u64, 0);
        };
        let request = config.get_path("request").cloned().unwrap_or(Value::Null);
        let max_messages = config.get_path("max_messages").and_then(|v| v.as_f64()).unwrap_or(100.0) as usize;
        let timeout_ms = config.get_path("timeout_ms").and_then(|v| v.as_f64()).unwrap_or(10_000.0) as u64;

        let mut grpc = match connect(&endpoint).await {
            Ok(g) => g,
            Err(e) => return StepResult::failed(format!("grpc connect failed: {}", e), started.elapsed().as_millis() as u64, 0),
        };
        let path = match method_path(&path) {
            Ok(p) => p,
            Err(e) => return StepResult::failed(format!("invalid grpc method path: {}", e), started.elapsed().as_millis() as u64, 0),
        };

        let call = async {
            grpc.ready().await.map_err(|e| e.to_string())?;
            grpc.server_streaming(tonic::Request::new(request), path, JsonCodec).await.map_err(|e| e.to_string())
        };

        let response = match tokio::time::timeout(Duration::from_millis(timeout_ms), call).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return StepResult::failed(format!("grpc stream call failed: {}", e), started.elapsed().as_millis() as u64, 0),
            Err(_) => return StepResult::failed("timeout waiting for grpc stream", started.elapsed().as_millis() as u64, 0),
        };

        let mut stream = response.into_inner();
        let mut messages = Vec::new();
        loop {
            if messages.len() >= max_messages || cancel.is_cancelled() {
                break;
            }
            match tokio::time::timeout(Duration::from_millis(timeout_ms), stream.message()).await {
                Ok(Ok(Some(message))) => messages.push(message),
                Ok(Ok(None)) => break,
                Ok(Err(e)) => return StepResult::failed(format!("grpc stream read failed: {}", e), started.elapsed().as_millis() as u64, 0),
                Err(_) => break,
            }
        }

        StepResult::passed(Value::Array(messages), started.elapsed().as_millis() as u64, 0)
    }

    fn name(&self) -> &'static str {
        "grpc_stream"
    }
}
