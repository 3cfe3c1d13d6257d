//! Kafka action handlers: `kafka_produce` and `kafka_consume`, backed by
//! `rdkafka` (the same Kafka client crate used elsewhere in the retrieval
//! pack for produce/consume workloads).

use crate::context::ExecutionContext;
use crate::registry::ActionHandler;
use async_trait::async_trait;
use flow_core::model::StepResult;
use flow_core::value::Value;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub struct KafkaProduceHandler;

#[async_trait]
impl ActionHandler for KafkaProduceHandler {
    async fn execute(&self, config: &Value, _context: &ExecutionContext, cancel: CancellationToken) -> StepResult {
        let started = Instant::now();
        let Some(brokers) = config.get_path("brokers").map(|v| v.as_display_string()) else {
            return StepResult::failed("kafka_produce requires 'brokers'", started.elapsed().as_millis() as u64, 0);
        };
        let Some(topic) = config.get_path("topic").map(|v| v.as_display_string()) else {
            return StepResult::failed("kafka_produce requires 'topic'", started.elapsed().as_millis() as u64, 0);
        };
        let payload = config.get_path("value").map(|v| v.as_display_string()).unwrap_or_default();
        let key = config.get_path("key").map(|v| v.as_display_string());

        let producer: FutureProducer = match ClientConfig::new().set("bootstrap.servers", &brokers).create() {
            Ok(p) => p,
            Err(e) => return StepResult::failed(format!("failed to create kafka producer: {}", e), started.elapsed().as_millis() as u64, 0),
        };

        let mut record = FutureRecord::to(&topic).payload(&payload);
        if let Some(key) = &key {
            record = record.key(key);
        }

        tokio::select! {
            result = producer.send(record, Duration::from_secs(5)) => match result {
                Ok((partition, offset)) => {
                    let output = Value::object([
                        ("partition".to_string(), Value::from(partition as i64)),
                        ("offset".to_string(), Value::from(offset)),
                    ]);
                    StepResult::passed(output, started.elapsed().as_millis() as u64, 0)
                }
                Err((e, _)) => StepResult::failed(format!("kafka produce failed: {}", e), started.elapsed().as_millis() as u64, 0),
            },
            _ = cancel.cancelled() => StepResult::cancelled(),
        }
    }

    fn name(&self) -> &'static str {
        "kafka_produce"
    }
}

pub struct KafkaConsumeHandler;

#[async_trait]
impl ActionHandler for KafkaConsumeHandler {
    async fn execute(&self, config: &Value, _context: &ExecutionContext, cancel: CancellationToken) -> StepResult {
        let started = Instant::now();
        let Some(brokers) = config.get_path("brokers").map(|v| v.as_display_string()) else {
            return StepResult::failed("kafka_consume requires 'brokers'", started.elapsed().as_millis() as u64, 0);
        };
        let Some(topic) = config.get_path("topic").map(|v| v.as_display_string()) else {
            return StepResult::failed("kafka_consume requires 'topic'", started.elapsed().as_millis() as u64, 0);
        };
        let group_id = config.get_path("group_id").map(|v| v.as_display_string()).unwrap_or_else(|| "flow-engine".to_string());
        let timeout_ms = config.get_path("timeout_ms").and_then(|v| v.as_f64()).unwrap_or(5000.0) as u64;

        let consumer: StreamConsumer = match ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("group.id", &group_id)
            .set("auto.offset.reset", "earliest")
            .create()
        {
            Ok(c) => c,
            Err(e) => return StepResult::failed(format!("failed to create kafka consumer: {}", e), started.elapsed().as_millis() as u64, 0),
        };
        if let Err(e) = consumer.subscribe(&[&topic]) {
            return StepResult::failed(format!("kafka subscribe failed: {}", e), started.elapsed().as_millis() as u64, 0);
        }

        let recv = tokio::time::timeout(Duration::from_millis(timeout_ms), consumer.recv());
        tokio::select! {
            result = recv => match result {
                Ok(Ok(message)) => {
                    let payload = message.payload().map(|p| String::from_utf8_lossy(p).to_string()).unwrap_or_default();
                    let output = Value::object([
                        ("partition".to_string(), Value::from(message.partition() as i64)),
                        ("offset".to_string(), Value::from(message.offset())),
                        ("value".to_string(), Value::String(payload)),
                    ]);
                    StepResult::passed(output, started.elapsed().as_millis() as u64, 0)
                }
                Ok(Err(e)) => StepResult::failed(format!("kafka consume failed: {}", e), started.elapsed().as_millis() as u64, 0),
                Err(_) => StepResult::failed("polling_timeout", started.elapsed().as_millis() as u64, 0),
            },
            _ = cancel.cancelled() => StepResult::cancelled(),
        }
    }

    fn name(&self) -> &'static str {
        "kafka_consume"
    }
}
