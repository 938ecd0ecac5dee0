//! In-memory transport used by the unit tests.

use crate::errors::GrabError;
use crate::transport::{Response, Transport};
use crate::Update;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;
use url::Url;

enum Reply {
    Body(u16, Vec<u8>),
    BrokenBody,
}

#[derive(Default)]
pub(crate) struct FakeTransport {
    replies: HashMap<String, Reply>,
    unreachable: HashSet<String>,
    listings: HashMap<(String, u64), (u16, String)>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fetched: Mutex<Vec<String>>,
    posted: Mutex<Vec<Value>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn serve(&mut self, url: &str, status: u16, body: impl Into<Vec<u8>>) {
        self.replies
            .insert(url.to_string(), Reply::Body(status, body.into()));
    }

    /// The response starts fine, then the connection drops mid-body.
    pub(crate) fn serve_broken_body(&mut self, url: &str) {
        self.replies.insert(url.to_string(), Reply::BrokenBody);
    }

    pub(crate) fn fail(&mut self, url: &str) {
        self.unreachable.insert(url.to_string());
    }

    /// Answers listing requests for `path` at page `page_num`.
    pub(crate) fn serve_listing(&mut self, path: &str, page_num: u64, status: u16, body: String) {
        self.listings
            .insert((path.to_string(), page_num), (status, body));
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub(crate) fn posted(&self) -> Vec<Value> {
        self.posted.lock().unwrap().clone()
    }
}

fn reply(status: u16, body: Vec<u8>) -> Response {
    let half = body.len() / 2;
    let (head, tail) = body.split_at(half);
    let chunks = vec![
        Ok(Bytes::copy_from_slice(head)),
        Ok(Bytes::copy_from_slice(tail)),
    ];
    Response {
        status,
        content_length: Some(body.len() as u64),
        charset: None,
        body: stream::iter(chunks).boxed(),
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(&self, url: &Url) -> Result<Response, GrabError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.fetched.lock().unwrap().push(url.to_string());

        if self.unreachable.contains(url.as_str()) {
            return Err(GrabError::NetworkError(url.to_string()));
        }
        match self.replies.get(url.as_str()) {
            Some(Reply::Body(status, body)) => Ok(reply(*status, body.clone())),
            Some(Reply::BrokenBody) => Ok(Response {
                status: 200,
                content_length: Some(64),
                charset: None,
                body: stream::iter(vec![
                    Ok(Bytes::from_static(b"partial")),
                    Err(GrabError::NetworkError("connection reset".into())),
                ])
                .boxed(),
            }),
            None => Ok(reply(404, Vec::new())),
        }
    }

    async fn post_json(&self, url: &Url, body: &Value) -> Result<Response, GrabError> {
        self.posted.lock().unwrap().push(body.clone());
        let path = body["path"].as_str().unwrap_or_default().to_string();
        let page = body["page_num"].as_u64().unwrap_or_default();
        if self.unreachable.contains(url.as_str()) {
            return Err(GrabError::NetworkError(url.to_string()));
        }
        match self.listings.get(&(path, page)) {
            Some((status, text)) => Ok(reply(*status, text.clone().into_bytes())),
            None => Ok(reply(404, Vec::new())),
        }
    }
}

/// Drains the update channel until every sender is gone.
pub(crate) fn collect_updates(mut rx: Receiver<Update>) -> JoinHandle<Vec<Update>> {
    tokio::spawn(async move {
        let mut updates = Vec::new();
        while let Some(update) = rx.recv().await {
            updates.push(update);
        }
        updates
    })
}
