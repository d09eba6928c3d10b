// src/websocket_server.rs - WebSocket fan-out for real-time clients
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::events::MarketEvent;
use crate::market::MarketService;
use crate::types::{now_millis, OrderKind, RoomStatus};

#[derive(Debug, Clone)]
pub struct ClientConnection {
    pub id: String,
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub rooms: HashSet<String>,
    pub sender: mpsc::UnboundedSender<Message>,
}

pub struct WebSocketServer {
    clients: Arc<DashMap<String, ClientConnection>>,
    market: Arc<MarketService>,
}

impl WebSocketServer {
    pub fn new(market: Arc<MarketService>) -> Self {
        Self {
            clients: Arc::new(DashMap::new()),
            market,
        }
    }

    pub async fn start(&self, addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(addr).await?;
        info!("📡 [WS_SERVER] WebSocket server listening on {}", addr);

        // Event broadcasting task
        let clients_clone = Arc::clone(&self.clients);
        let mut event_receiver = self.market.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = event_receiver.recv().await {
                Self::broadcast_event(&clients_clone, &event);
            }
        });

        // Accept connections
        while let Ok((stream, peer)) = listener.accept().await {
            let clients = Arc::clone(&self.clients);
            let market = Arc::clone(&self.market);
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, peer, clients, market).await {
                    error!("❌ [WS_SERVER] Error handling connection from {}: {}", peer, e);
                }
            });
        }

        Ok(())
    }

    async fn handle_connection(
        stream: TcpStream,
        peer: SocketAddr,
        clients: Arc<DashMap<String, ClientConnection>>,
        market: Arc<MarketService>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let client_id = Uuid::new_v4().to_string();
        let (tx, mut rx) = mpsc::unbounded_channel();

        info!("🔗 [WS_SERVER] Client {} connected from {}", client_id, peer);

        // Initial sync: current price and forming candle, like a first tick.
        let welcome = json!({
            "type": "connected",
            "client_id": client_id,
            "price": market.current_price(),
            "candle": market.current_candle(),
            "server_time": now_millis(),
        });
        if let Err(e) = ws_sender.send(Message::Text(welcome.to_string())).await {
            error!("❌ [WS_SERVER] Failed to send welcome message: {}", e);
            return Ok(());
        }

        let client = ClientConnection {
            id: client_id.clone(),
            user_id: None,
            username: None,
            rooms: HashSet::new(),
            sender: tx,
        };
        clients.insert(client_id.clone(), client);

        // Outgoing pump
        let clients_clone = Arc::clone(&clients);
        let client_id_clone = client_id.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = ws_sender.send(message).await {
                    warn!("⚠️ [WS_SERVER] Failed to send message to client {}: {}", client_id_clone, e);
                    clients_clone.remove(&client_id_clone);
                    break;
                }
            }
        });

        // Incoming messages
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if let Err(e) = Self::handle_client_message(&clients, &market, &client_id, &text) {
                        error!("❌ [WS_SERVER] Error handling message from {}: {}", client_id, e);
                    }
                }
                Ok(Message::Close(_)) => {
                    info!("👋 [WS_SERVER] Client {} disconnected", client_id);
                    break;
                }
                Ok(Message::Ping(payload)) => {
                    if let Some(client) = clients.get(&client_id) {
                        let _ = client.sender.send(Message::Pong(payload));
                    }
                }
                Err(e) => {
                    error!("❌ [WS_SERVER] WebSocket error for client {}: {}", client_id, e);
                    break;
                }
                _ => {}
            }
        }

        clients.remove(&client_id);
        info!("🧹 [WS_SERVER] Client {} cleaned up", client_id);

        Ok(())
    }

    fn handle_client_message(
        clients: &Arc<DashMap<String, ClientConnection>>,
        market: &Arc<MarketService>,
        client_id: &str,
        message: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let request: serde_json::Value = serde_json::from_str(message)?;

        match request.get("type").and_then(|t| t.as_str()) {
            Some("authenticate") => {
                // Identity is asserted by the caller; real authentication
                // lives in the outer stack, not here.
                let user_id = request.get("user_id").and_then(|v| v.as_str());
                let username = request.get("username").and_then(|v| v.as_str());

                if let (Some(user_id), Some(mut client)) = (user_id, clients.get_mut(client_id)) {
                    client.user_id = Some(user_id.to_string());
                    client.username = username.map(|u| u.to_string());

                    let response = json!({
                        "type": "authenticated",
                        "user_id": user_id,
                        "username": username,
                    });
                    let _ = client.sender.send(Message::Text(response.to_string()));
                    debug!("📝 [WS_SERVER] Client {} identified as {}", client_id, user_id);
                } else {
                    Self::send_error(clients, client_id, "validation", "user_id is required");
                }
            }
            Some("join_room") => {
                let Some(room_id) = request.get("room_id").and_then(|v| v.as_str()) else {
                    Self::send_error(clients, client_id, "validation", "room_id is required");
                    return Ok(());
                };

                match market.room_detail(room_id) {
                    Ok(room) => {
                        if let Some(mut client) = clients.get_mut(client_id) {
                            client.rooms.insert(room_id.to_string());

                            let status_update = json!({
                                "type": "room_status_update",
                                "room_id": room_id,
                                "name": room.name,
                                "status": room.status,
                                "start_time": room.start_time,
                                "end_time": room.end_time,
                            });
                            let _ = client.sender.send(Message::Text(status_update.to_string()));

                            // Active rooms also get an immediate price sync.
                            if room.status == RoomStatus::Active {
                                let sync = json!({
                                    "type": "price_update",
                                    "price": market.current_price(),
                                    "candle": market.current_candle(),
                                    "is_new_candle": false,
                                    "server_time": now_millis(),
                                    "is_initial_sync": true,
                                });
                                let _ = client.sender.send(Message::Text(sync.to_string()));
                            }

                            if let Ok(ranking) = market.room_ranking(room_id) {
                                let payload = json!({
                                    "type": "room_ranking",
                                    "ranking": ranking,
                                });
                                let _ = client.sender.send(Message::Text(payload.to_string()));
                            }

                            debug!("📝 [WS_SERVER] Client {} joined room {}", client_id, room_id);
                        }
                    }
                    Err(e) => Self::send_error(clients, client_id, e.kind(), &e.to_string()),
                }
            }
            Some("leave_room") => {
                if let Some(room_id) = request.get("room_id").and_then(|v| v.as_str()) {
                    if let Some(mut client) = clients.get_mut(client_id) {
                        client.rooms.remove(room_id);
                        debug!("📝 [WS_SERVER] Client {} left room {}", client_id, room_id);
                    }
                }
            }
            Some("place_order") => {
                Self::handle_place_order(clients, market, client_id, &request);
            }
            Some("get_room_ranking") => {
                let Some(room_id) = request.get("room_id").and_then(|v| v.as_str()) else {
                    Self::send_error(clients, client_id, "validation", "room_id is required");
                    return Ok(());
                };

                match market.room_ranking(room_id) {
                    Ok(ranking) => {
                        if let Some(client) = clients.get(client_id) {
                            let payload = json!({
                                "type": "room_ranking",
                                "ranking": ranking,
                            });
                            let _ = client.sender.send(Message::Text(payload.to_string()));
                        }
                    }
                    Err(e) => Self::send_error(clients, client_id, e.kind(), &e.to_string()),
                }
            }
            Some("ping_test") => {
                if let Some(client) = clients.get(client_id) {
                    let response = json!({
                        "type": "pong_test",
                        "timestamp": now_millis(),
                    });
                    let _ = client.sender.send(Message::Text(response.to_string()));
                }
            }
            _ => {
                warn!("❓ [WS_SERVER] Unknown message type from client {}: {}", client_id, message);
            }
        }

        Ok(())
    }

    fn handle_place_order(
        clients: &Arc<DashMap<String, ClientConnection>>,
        market: &Arc<MarketService>,
        client_id: &str,
        request: &serde_json::Value,
    ) {
        // Identity comes from authenticate, with a per-message fallback for
        // clients that lost their session.
        let (user_id, username) = match clients.get(client_id) {
            Some(client) => (
                client
                    .user_id
                    .clone()
                    .or_else(|| request.get("user_id").and_then(|v| v.as_str()).map(String::from)),
                client.username.clone(),
            ),
            None => (None, None),
        };

        let Some(user_id) = user_id else {
            Self::send_error(clients, client_id, "forbidden", "Not authenticated");
            return;
        };
        let username = username
            .or_else(|| request.get("username").and_then(|v| v.as_str()).map(String::from))
            .unwrap_or_else(|| user_id.clone());

        let Some(room_id) = request.get("room_id").and_then(|v| v.as_str()) else {
            Self::send_error(clients, client_id, "validation", "room_id is required");
            return;
        };
        let Some(kind) = request
            .get("order")
            .cloned()
            .and_then(|v| serde_json::from_value::<OrderKind>(v).ok())
        else {
            Self::send_error(clients, client_id, "validation", "order must be LONG, SHORT or CLOSE");
            return;
        };
        let size = request.get("size").and_then(|v| v.as_f64()).unwrap_or(1.0);

        match market.place_order(&user_id, &username, room_id, kind, size) {
            Ok(outcome) => {
                if let Some(client) = clients.get(client_id) {
                    let payload = json!({
                        "type": "order_confirmed",
                        "data": outcome,
                    });
                    let _ = client.sender.send(Message::Text(payload.to_string()));
                }
            }
            Err(e) => {
                warn!("⚠️ [WS_SERVER] Order from client {} rejected: {}", client_id, e);
                Self::send_error(clients, client_id, e.kind(), &e.to_string());
            }
        }
    }

    fn send_error(
        clients: &Arc<DashMap<String, ClientConnection>>,
        client_id: &str,
        kind: &str,
        message: &str,
    ) {
        if let Some(client) = clients.get(client_id) {
            let payload = json!({
                "type": "error",
                "error": kind,
                "message": message,
            });
            let _ = client.sender.send(Message::Text(payload.to_string()));
        }
    }

    /// Route one engine event to the clients that should see it: price and
    /// candle events go to everyone, room events to that room's subscribers,
    /// order confirmations to the owner only.
    fn broadcast_event(clients: &Arc<DashMap<String, ClientConnection>>, event: &MarketEvent) {
        let message_text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(e) => {
                error!("❌ [WS_SERVER] Failed to serialize event: {}", e);
                return;
            }
        };

        let mut broadcast_count = 0;
        for client in clients.iter() {
            let should_send = match event {
                MarketEvent::PriceUpdate { .. }
                | MarketEvent::CandleCompleted { .. }
                | MarketEvent::Error { .. } => true,
                MarketEvent::RoomActivated { room_id, .. }
                | MarketEvent::RoomClosing { room_id, .. }
                | MarketEvent::RoomClosed { room_id, .. } => client.rooms.contains(room_id),
                MarketEvent::RankingUpdated { ranking } => client.rooms.contains(&ranking.room_id),
                MarketEvent::OrderConfirmed { trade } => {
                    client.user_id.as_deref() == Some(trade.user_id.as_str())
                }
            };

            if should_send {
                if client.sender.send(Message::Text(message_text.clone())).is_err() {
                    warn!("⚠️ [WS_SERVER] Failed to queue event for client {}", client.id);
                } else {
                    broadcast_count += 1;
                }
            }
        }

        if broadcast_count > 0 {
            debug!("📡 [WS_SERVER] Broadcasted event to {} clients", broadcast_count);
        }
    }
}
