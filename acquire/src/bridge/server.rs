use crate::bridge::model::StatusModel;
use anyhow::{anyhow, Context};
use feedcore::remote::{Command, RemoteClient};
use log::{error, info};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{mpsc, Arc, RwLock};
use std::thread;
use tokio::runtime::Builder;
use warp::{Filter, Rejection, Reply};

/// HTTP front of the remote command channel.
///
/// `GET /status` returns the latest [`StatusModel`], `POST /command` queues a
/// JSON command and answers with its id, `GET /responses` drains the replies
/// the scheduler produced since the previous call.
pub struct HttpBridge;

impl HttpBridge {
    /// Serves on `bind` from a dedicated thread and returns the bound address
    /// once the listener is up.
    pub fn spawn(
        bind: SocketAddr,
        client: RemoteClient,
        state: Arc<RwLock<StatusModel>>,
    ) -> anyhow::Result<SocketAddr> {
        let (ready_tx, ready_rx) = mpsc::channel();
        thread::Builder::new()
            .name("http-bridge".into())
            .spawn(move || {
                let runtime = match Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow!("building bridge runtime: {}", err)));
                        return;
                    }
                };
                runtime.block_on(async move {
                    match warp::serve(routes(client, state)).try_bind_ephemeral(bind) {
                        Ok((addr, server)) => {
                            let _ = ready_tx.send(Ok(addr));
                            server.await;
                        }
                        Err(err) => {
                            let _ = ready_tx.send(Err(anyhow!("binding {}: {}", bind, err)));
                        }
                    }
                });
            })
            .context("spawning bridge thread")?;

        let addr = ready_rx
            .recv()
            .context("bridge thread exited before binding")??;
        info!("[bridge] listening on http://{}", addr);
        Ok(addr)
    }
}

pub fn routes(
    client: RemoteClient,
    state: Arc<RwLock<StatusModel>>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let state_filter = warp::any().map(move || Arc::clone(&state));
    let client_filter = warp::any().map(move || client.clone());

    let status_route = warp::path("status")
        .and(warp::path::end())
        .and(warp::get())
        .and(state_filter)
        .map(|state: Arc<RwLock<StatusModel>>| {
            let guard = state.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            warp::reply::json(&*guard)
        });

    let command_route = warp::path("command")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(client_filter.clone())
        .and_then(|command: Command, client: RemoteClient| async move {
            let id = client.submit(command);
            Ok::<_, Infallible>(warp::reply::json(&json!({ "id": id })))
        });

    let responses_route = warp::path("responses")
        .and(warp::path::end())
        .and(warp::get())
        .and(client_filter)
        .map(|client: RemoteClient| warp::reply::json(&client.take_responses()));

    status_route
        .or(command_route)
        .or(responses_route)
        .with(warp::log::custom(|info| {
            if info.status().is_server_error() {
                error!("[bridge] {} {} -> {}", info.method(), info.path(), info.status());
            }
        }))
}
