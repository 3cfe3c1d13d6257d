//! Browser action handler: drives a headless Chromium instance via
//! `chromiumoxide` for flows that need to exercise a real page (smoke
//! tests against a UI, not just its API).
//!
//! Config shape: `{ url, actions?: [{ type: "click"|"type"|"wait_for_selector",
//! selector?, text? }], extract?: { selector, attribute? } }`.

use crate::context::ExecutionContext;
use crate::registry::ActionHandler;
use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig};
use flow_core::model::StepResult;
use flow_core::value::Value;
use futures_util::StreamExt;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct BrowserHandler;

async fn run(config: &Value) -> Result<Value, String> {
    let Some(url) = config.get_path("url").map(|v| v.as_display_string()) else {
        return Err("browser step requires 'url'".to_string());
    };

    let browser_config = BrowserConfig::builder().build().map_err(|e| e)?;
    let (mut browser, mut handler) = Browser::launch(browser_config).await.map_err(|e| e.to_string())?;
    let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });

    let page = browser.new_page(&url).await.map_err(|e| e.to_string())?;
    page.wait_for_navigation().await.map_err(|e| e.to_string())?;

    if let Some(Value::Array(actions)) = config.get_path("actions") {
        for action in actions {
            let kind = action.get_path("type").map(|v| v.as_display_string()).unwrap_or_default();
            let selector = action.get_path("selector").map(|v| v.as_display_string()).unwrap_or_default();
            match kind.as_str() {
                "click" => {
                    let element = page.find_element(&selector).await.map_err(|e| e.to_string())?;
                    element.click().await.map_err(|e| e.to_string())?;
                }
                "type" => {
                    let text = action.get_path("text").map(|v| v.as_display_string()).unwrap_or_default();
                    let element = page.find_element(&selector).await.map_err(|e| e.to_string())?;
                    element.type_str(&text).await.map_err(|e| e.to_string())?;
                }
                "wait_for_selector" => {
                    page.find_element(&selector).await.map_err(|e| e.to_string())?;
                }
                other => return Err(format!("unknown browser action: {}", other)),
            }
        }
    }

    let mut output = std::collections::BTreeMap::new();
    if let Some(extract) = config.get_path("extract") {
        let selector = extract.get_path("selector").map(|v| v.as_display_string()).unwrap_or_default();
        let element = page.find_element(&selector).await.map_err(|e| e.to_string())?;
        let extracted = if let Some(attribute) = extract.get_path("attribute").map(|v| v.as_display_string()) {
            element.attribute(&attribute).await.map_err(|e| e.to_string())?.unwrap_or_default()
        } else {
            element.inner_text().await.map_err(|e| e.to_string())?.unwrap_or_default()
        };
        output.insert("extracted".to_string(), Value::String(extracted));
    }

    let title = page.get_title().await.map_err(|e| e.to_string())?.unwrap_or_default();
    output.insert("title".to_string(), Value::String(title));

    browser.close().await.map_err(|e| e.to_string())?;
    handler_task.abort();

    Ok(Value::Object(output))
}

#[async_trait]
impl ActionHandler for BrowserHandler {
    async fn execute(&self, config: &Value, _context: &ExecutionContext, cancel: CancellationToken) -> StepResult {
        let started = Instant::now();
        let result = tokio::select! {
            r = run(config) => r,
            _ = cancel.cancelled() => return StepResult::cancelled(),
        };
        match result {
            Ok(output) => StepResult::passed(output, started.elapsed().as_millis() as u64, 0),
            Err(e) => StepResult::failed(e, started.elapsed().as_millis() as u64, 0),
        }
    }

    fn name(&self) -> &'static str {
        "browser"
    }
}
