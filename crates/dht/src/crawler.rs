use std::future::Future;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, Instant};

use grapefruit_krpc::Message;
use grapefruit_metrics::{MetricsService, TracingService};
use grapefruit_models::{krpc_code, DhtConfig, GrapefruitError, Id20, InfoHash, NodeId};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::handler::DhtHandler;
use crate::state::{DhtState, Event, Outgoing, QueryContext, Step};

/// How often an empty routing table triggers another round of bootstrap queries.
const REBOOTSTRAP_INTERVAL: Duration = Duration::from_secs(10);
const COMMAND_QUEUE_DEPTH: usize = 4096;

#[derive(Debug)]
enum Command {
    SearchPeers(InfoHash),
}

/// Cloneable handle for talking to a running crawler from other tasks.
#[derive(Clone)]
pub struct CrawlerHandle {
    tx: mpsc::Sender<Command>,
    local_addr: SocketAddr,
    node_id: NodeId,
}

impl CrawlerHandle {
    pub async fn search_peers(&self, info_hash: InfoHash) -> Result<(), GrapefruitError> {
        self.tx
            .send(Command::SearchPeers(info_hash))
            .await
            .map_err(|_| GrapefruitError::InternalError { reason: "crawler is not running".to_string() })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }
}

pub struct DhtCrawler {
    socket: Arc<UdpSocket>,
    state: DhtState,
    commands: mpsc::Receiver<Command>,
    interval: Duration,
    bootstrap_nodes: Vec<String>,
    metrics: Arc<MetricsService>,
}

impl DhtCrawler {
    /// Binds the UDP socket and returns the crawler together with a handle to it.
    pub async fn bind(config: &DhtConfig, metrics: Arc<MetricsService>) -> Result<(Self, CrawlerHandle), GrapefruitError> {
        let node_id = match &config.node_id {
            Some(hex) => hex.parse::<Id20>()?,
            None => Id20::random(),
        };

        let socket = UdpSocket::bind(format!("{}:{}", config.bind, config.port)).await?;
        let local_addr = socket.local_addr()?;
        info!(node_id = %node_id, local_addr = %local_addr, "DHT node bound");

        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let crawler = Self {
            socket: Arc::new(socket),
            state: DhtState::new(node_id),
            commands: rx,
            interval: Duration::from_millis(config.interval_ms.max(1)),
            bootstrap_nodes: config.bootstrap_nodes.clone(),
            metrics,
        };
        let handle = CrawlerHandle { tx, local_addr, node_id };

        Ok((crawler, handle))
    }

    /// Runs until `shutdown` resolves.
    #[instrument(skip_all)]
    pub async fn run<H, F>(mut self, handler: Arc<H>, shutdown: F) -> Result<(), GrapefruitError>
    where
        H: DhtHandler,
        F: Future<Output = ()>,
    {
        let mut last_bootstrap = Instant::now();
        self.bootstrap().await;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = vec![0u8; 65536];
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("DHT crawler shutting down");
                    break;
                }
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((n, SocketAddr::V4(from))) => {
                            self.metrics.record_message_received();
                            let step = self.state.handle_datagram(&buf[..n], from, Instant::now());
                            self.apply(step, &handler).await;
                        }
                        Ok((_, from)) => debug!(from = %from, "Ignoring IPv6 datagram"),
                        // ICMP port-unreachable surfaces here on some platforms.
                        Err(e) => debug!(error = %e, "UDP receive failed"),
                    }
                }
                Some(command) = self.commands.recv() => {
                    match command {
                        Command::SearchPeers(info_hash) => {
                            let outgoing = self.state.search_peers(info_hash, Instant::now());
                            self.metrics.record_search_started();
                            TracingService::log_search_started(&info_hash, outgoing.len());
                            self.send_all(outgoing).await;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if self.state.routing().is_empty() && last_bootstrap.elapsed() >= REBOOTSTRAP_INTERVAL {
                        last_bootstrap = Instant::now();
                        self.bootstrap().await;
                    }
                    let step = self.state.tick(Instant::now());
                    self.apply(step, &handler).await;
                    self.metrics.set_routing_table_nodes(self.state.routing().len());
                    self.metrics.set_searches_in_flight(self.state.searches_in_flight());
                }
            }
        }

        Ok(())
    }

    async fn bootstrap(&self) {
        let mut addrs: Vec<SocketAddrV4> = Vec::new();
        for host in &self.bootstrap_nodes {
            match tokio::net::lookup_host(host.as_str()).await {
                Ok(resolved) => addrs.extend(resolved.filter_map(|a| match a {
                    SocketAddr::V4(v4) => Some(v4),
                    SocketAddr::V6(_) => None,
                })),
                Err(e) => warn!(host = %host, error = %e, "Failed to resolve bootstrap node"),
            }
        }
        info!(nodes = addrs.len(), "Bootstrapping DHT");
        let outgoing = self.state.bootstrap(&addrs);
        self.send_all(outgoing).await;
    }

    async fn send_all(&self, outgoing: Vec<Outgoing>) {
        for (addr, msg) in outgoing {
            send(&self.socket, &self.metrics, addr, &msg).await;
        }
    }

    async fn apply<H: DhtHandler>(&self, step: Step, handler: &Arc<H>) {
        if step.malformed {
            self.metrics.record_malformed_message();
        }
        self.send_all(step.outgoing).await;

        for event in step.events {
            if let Some(method) = event_method(&event) {
                self.metrics.record_query(method);
            }
            if let Event::PeersFound { info_hash, peers } = &event {
                self.metrics.record_search_finished();
                TracingService::log_peers_found(info_hash, peers.len());
            }

            let handler = handler.clone();
            let socket = self.socket.clone();
            let metrics = self.metrics.clone();
            tokio::spawn(async move {
                dispatch(event, handler.as_ref(), &socket, &metrics).await;
            });
        }
    }
}

fn event_method(event: &Event) -> Option<&'static str> {
    match event {
        Event::Ping { .. } => Some("ping"),
        Event::FindNode { .. } => Some("find_node"),
        Event::GetPeers { .. } => Some("get_peers"),
        Event::AnnouncePeer { .. } => Some("announce_peer"),
        Event::PeersFound { .. } => None,
    }
}

async fn dispatch<H: DhtHandler>(event: Event, handler: &H, socket: &UdpSocket, metrics: &MetricsService) {
    let method = event_method(&event);
    let (ctx, result): (Option<QueryContext>, Result<(), GrapefruitError>) = match event {
        Event::Ping { ctx } => {
            let r = handler.ping_received(ctx.node).await;
            (Some(ctx), r)
        }
        Event::FindNode { ctx, target } => {
            let r = handler.find_node_received(ctx.node, target).await;
            (Some(ctx), r)
        }
        Event::GetPeers { ctx, info_hash } => {
            let r = handler.get_peers_received(ctx.node, info_hash).await;
            (Some(ctx), r)
        }
        Event::AnnouncePeer { ctx, info_hash, port } => {
            let r = handler.announce_peer_received(ctx.node, info_hash, port).await;
            (Some(ctx), r)
        }
        Event::PeersFound { info_hash, peers } => (None, handler.peers_found(info_hash, peers).await),
    };

    if let Err(e) = result {
        match ctx {
            Some(ctx) => {
                TracingService::log_handler_error(method.unwrap_or("unknown"), &ctx.node.addr, &e);
                let reply = handler_failure_reply(ctx.transaction_id);
                send(socket, metrics, ctx.node.addr, &reply).await;
            }
            None => warn!(error = %e, "peers_found handler failed"),
        }
    }
}

/// Any handler failure is reported as a server error, whatever its cause.
fn handler_failure_reply(transaction_id: Vec<u8>) -> Message {
    Message::error(transaction_id, krpc_code::SERVER, "Server Error")
}

async fn send(socket: &UdpSocket, metrics: &MetricsService, addr: SocketAddrV4, msg: &Message) {
    match socket.send_to(&msg.to_bytes(), addr).await {
        Ok(_) => metrics.record_message_sent(),
        Err(e) => debug!(to = %addr, error = %e, "UDP send failed"),
    }
}
