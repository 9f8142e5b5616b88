//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. Routing is a plain
//! match over method and path; body-consuming routes are dispatched first
//! so the request can be moved into their handlers.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use reach_cache_core::{CacheEntry, CacheError, EvictionCache};

use crate::cache::{ContentResolver, WriteBuffer, WritePriority};
use crate::config::Args;
use crate::ledger::{HttpDeliveryClient, HttpLedgerClient};
use crate::projection::{ProjectionSignal, ProjectionStore};
use crate::types::{Result, WaypointError};

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Shared application state
pub struct AppState {
    pub args: Args,
    /// Reach-aware metadata cache with priority eviction
    pub cache: Arc<EvictionCache>,
    /// Projection hot cache
    pub projection: Arc<ProjectionStore>,
    /// Tiered read resolver (projection → ledger → delivery)
    pub resolver: Arc<ContentResolver>,
    /// Priority write buffer in front of the ledger
    pub buffer: Arc<WriteBuffer>,
    /// Broadcast sender feeding the projection engine
    pub signal_tx: broadcast::Sender<ProjectionSignal>,
    /// Ledger client, shared with the flush task
    pub ledger: Arc<dyn crate::ledger::LedgerClient>,
}

impl AppState {
    pub fn new(args: Args) -> Result<Self> {
        let cache = Arc::new(EvictionCache::new(args.cache_config()));
        let projection = Arc::new(ProjectionStore::new(args.projection_config()));

        let ledger = HttpLedgerClient::new(&args.ledger_url, args.request_timeout_ms)?;
        let ledger: Arc<dyn crate::ledger::LedgerClient> = Arc::new(ledger);

        let delivery = match &args.delivery_url {
            Some(url) => {
                let client = HttpDeliveryClient::new(url, args.request_timeout_ms)?;
                Some(Arc::new(client) as Arc<dyn crate::ledger::DeliveryClient>)
            }
            None => None,
        };

        let resolver = Arc::new(ContentResolver::new(
            Arc::clone(&projection),
            Some(Arc::clone(&ledger)),
            delivery,
            args.resolver_config(),
        ));

        let buffer = Arc::new(WriteBuffer::new(args.write_buffer_config()));
        let (signal_tx, _) = broadcast::channel(1000);

        Ok(Self {
            args,
            cache,
            projection,
            resolver,
            buffer,
            signal_tx,
            ledger,
        })
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Waypoint listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let raw_query = req.uri().query().map(str::to_string);

    debug!("[{}] {} {}", addr, method, path);

    // Body-consuming routes take the request whole
    if method == Method::POST {
        if path == "/signals" {
            return Ok(to_boxed(handle_signal(state, req).await));
        }
        if path == "/entries" {
            return Ok(to_boxed(handle_put_entry(state, req).await));
        }
        if let Some(rest) = path.strip_prefix("/cache/") {
            let rest = rest.to_string();
            return Ok(to_boxed(handle_queue_write(state, req, &rest).await));
        }
    }

    let response = match (method, path.as_str()) {
        (Method::GET, "/health") | (Method::GET, "/healthz") => json_response(
            StatusCode::OK,
            serde_json::json!({ "status": "ok", "node_id": state.args.node_id }),
        ),

        (Method::GET, "/status") => handle_status(&state).await,

        (Method::OPTIONS, _) => preflight_response(),

        (Method::GET, p) if p.starts_with("/cache/") => {
            let rest = &p["/cache/".len()..];
            match split_two(rest) {
                Some((doc_type, id)) => handle_resolve(&state, doc_type, id).await,
                // Single segment is a collection read, delegated to the ledger
                None if !rest.is_empty() && !rest.contains('/') => {
                    handle_collection_query(&state, rest, raw_query.as_deref()).await
                }
                None => bad_request_response("Expected /cache/{type} or /cache/{type}/{id}"),
            }
        }

        (Method::DELETE, p) if p.starts_with("/cache/") => {
            match split_two(&p["/cache/".len()..]) {
                Some((doc_type, id)) => {
                    let count = state.projection.invalidate(&format!("{}:{}", doc_type, id));
                    json_response(StatusCode::OK, serde_json::json!({ "invalidated": count }))
                }
                None => bad_request_response("Expected /cache/{type}/{id}"),
            }
        }

        (Method::GET, p) if p.starts_with("/entries/") => {
            match split_reach_id(&p["/entries/".len()..]) {
                Some((reach, id)) => match state.cache.get(id, reach) {
                    Some(entry) => json_response(StatusCode::OK, serde_json::json!(entry)),
                    None => not_found_response(p),
                },
                None => bad_request_response("Expected /entries/{reach}/{id}"),
            }
        }

        (Method::DELETE, p) if p.starts_with("/entries/") => {
            match split_reach_id(&p["/entries/".len()..]) {
                Some((reach, id)) => {
                    let removed = state.cache.delete(id, reach);
                    json_response(StatusCode::OK, serde_json::json!({ "removed": removed }))
                }
                None => bad_request_response("Expected /entries/{reach}/{id}"),
            }
        }

        (Method::GET, p) if p.starts_with("/query/domain/") => {
            match split_two(&p["/query/domain/".len()..]) {
                Some((domain, epic)) => {
                    let entries = state.cache.query_by_domain_epic(domain, epic);
                    query_response(entries)
                }
                None => bad_request_response("Expected /query/domain/{domain}/{epic}"),
            }
        }

        (Method::GET, p) if p.starts_with("/query/custodian/") => {
            let custodian = &p["/query/custodian/".len()..];
            if custodian.is_empty() || custodian.contains('/') {
                bad_request_response("Expected /query/custodian/{custodian_id}")
            } else {
                query_response(state.cache.query_by_custodian(custodian))
            }
        }

        (_, p) => not_found_response(p),
    };

    Ok(to_boxed(response))
}

/// Resolve content through the tier chain
async fn handle_resolve(state: &Arc<AppState>, doc_type: &str, id: &str) -> Response<Full<Bytes>> {
    match state.resolver.resolve(doc_type, id).await {
        Ok(result) => json_response(StatusCode::OK, serde_json::json!(result)),
        Err(e) => error_response(e),
    }
}

/// Collection read, delegated entirely to the ledger's query endpoint
async fn handle_collection_query(
    state: &Arc<AppState>,
    doc_type: &str,
    raw_query: Option<&str>,
) -> Response<Full<Bytes>> {
    match state.ledger.query(doc_type, raw_query).await {
        Ok(value) => json_response(StatusCode::OK, value),
        Err(e) => error_response(e),
    }
}

/// Queue a write through the buffer; responds 202 with the operation id
async fn handle_queue_write(
    state: Arc<AppState>,
    req: Request<Incoming>,
    rest: &str,
) -> Response<Full<Bytes>> {
    let Some((doc_type, id)) = split_two(rest) else {
        return bad_request_response("Expected /cache/{type}/{id}");
    };
    let (doc_type, id) = (doc_type.to_string(), id.to_string());

    let priority = match priority_from_query(req.uri().query()) {
        Ok(p) => p,
        Err(message) => return bad_request_response(&message),
    };

    let data = match read_json_body(req).await {
        Ok(value) => value,
        Err(response) => return response,
    };

    match state.buffer.enqueue(doc_type, id, data, priority, None).await {
        Ok(operation_id) => json_response(
            StatusCode::ACCEPTED,
            serde_json::json!({ "operation_id": operation_id, "priority": priority }),
        ),
        Err(e) => error_response(e),
    }
}

/// Accept a projection signal and hand it to the engine
async fn handle_signal(state: Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let value = match read_json_body(req).await {
        Ok(value) => value,
        Err(response) => return response,
    };

    let signal: ProjectionSignal = match serde_json::from_value(value) {
        Ok(signal) => signal,
        Err(e) => return bad_request_response(&format!("Invalid signal: {}", e)),
    };

    match state.signal_tx.send(signal) {
        Ok(_) => json_response(StatusCode::ACCEPTED, serde_json::json!({ "accepted": true })),
        Err(_) => error_response(WaypointError::Internal(
            "projection engine not running".to_string(),
        )),
    }
}

/// Insert a metadata entry into the eviction cache
async fn handle_put_entry(state: Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let value = match read_json_body(req).await {
        Ok(value) => value,
        Err(response) => return response,
    };

    let entry: CacheEntry = match serde_json::from_value(value) {
        Ok(entry) => entry,
        Err(e) => return bad_request_response(&format!("Invalid entry: {}", e)),
    };

    match state.cache.put(entry) {
        Ok(evicted) => json_response(StatusCode::OK, serde_json::json!({ "evicted": evicted })),
        Err(CacheError::InvalidEntry(message)) => bad_request_response(&message),
    }
}

/// Aggregate status across every subsystem
async fn handle_status(state: &Arc<AppState>) -> Response<Full<Bytes>> {
    let reach_stats: Vec<serde_json::Value> = (0..8u8)
        .filter_map(|reach| {
            state.cache.get_reach_stats(reach).map(|stats| {
                serde_json::json!({ "reach_level": reach, "stats": stats })
            })
        })
        .collect();

    let body = serde_json::json!({
        "node_id": state.args.node_id,
        "cache": {
            "global": state.cache.get_global_stats(),
            "reaches": reach_stats,
        },
        "projection": state.projection.stats(),
        "resolution": state.resolver.get_stats(),
        "write_buffer": state.buffer.stats().await,
    });
    json_response(StatusCode::OK, body)
}

// Path and query parsing helpers

/// Split "{a}/{b}" into two non-empty segments
fn split_two(rest: &str) -> Option<(&str, &str)> {
    let (a, b) = rest.split_once('/')?;
    if a.is_empty() || b.is_empty() || b.contains('/') {
        return None;
    }
    Some((a, b))
}

fn split_reach_id(rest: &str) -> Option<(u8, &str)> {
    let (reach, id) = split_two(rest)?;
    Some((reach.parse().ok()?, id))
}

fn priority_from_query(query: Option<&str>) -> std::result::Result<WritePriority, String> {
    let Some(query) = query else {
        return Ok(WritePriority::default());
    };
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("priority=") {
            return WritePriority::parse(value)
                .ok_or_else(|| format!("Unknown priority '{}' (high, normal, bulk)", value));
        }
    }
    Ok(WritePriority::default())
}

async fn read_json_body(
    req: Request<Incoming>,
) -> std::result::Result<serde_json::Value, Response<Full<Bytes>>> {
    let bytes = match req.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return Err(bad_request_response(&format!("Body read failed: {}", e))),
    };
    serde_json::from_slice(&bytes)
        .map_err(|e| bad_request_response(&format!("Invalid JSON body: {}", e)))
}

// Response helpers

fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

fn error_response(err: WaypointError) -> Response<Full<Bytes>> {
    let (status, message) = err.into_status_code_and_body();
    json_response(status, serde_json::json!({ "error": message }))
}

fn query_response(entries: Vec<(String, u8)>) -> Response<Full<Bytes>> {
    let body: Vec<serde_json::Value> = entries
        .into_iter()
        .map(|(id, reach)| serde_json::json!({ "id": id, "reach_level": reach }))
        .collect();
    json_response(StatusCode::OK, serde_json::json!({ "entries": body }))
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, DELETE, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
    });

    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

/// Bad request response
fn bad_request_response(message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Bad Request",
        "message": message,
    });

    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_two_rejects_extra_segments() {
        assert_eq!(split_two("Content/id"), Some(("Content", "id")));
        assert!(split_two("Content").is_none());
        assert!(split_two("Content/id/extra").is_none());
        assert!(split_two("/id").is_none());
    }

    #[test]
    fn split_reach_id_parses_reach() {
        assert_eq!(split_reach_id("3/doc-1"), Some((3, "doc-1")));
        assert!(split_reach_id("nine/doc-1").is_none());
    }

    #[test]
    fn priority_query_parsing() {
        assert_eq!(priority_from_query(None).unwrap(), WritePriority::Normal);
        assert_eq!(
            priority_from_query(Some("priority=high")).unwrap(),
            WritePriority::High
        );
        assert_eq!(
            priority_from_query(Some("other=1&priority=bulk")).unwrap(),
            WritePriority::Bulk
        );
        assert!(priority_from_query(Some("priority=urgent")).is_err());
    }
}
