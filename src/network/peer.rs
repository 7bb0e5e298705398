// The peer mesh: a fully connected set of TCP streams carrying JSON
// envelopes. Each connection gets its own reader thread, so messages from
// one peer are always handled serially; the first frame either side sends
// is a Hello announcing its id.

use crate::error::{Result, TangleError};
use crate::network::message::{Envelope, Message};
use log::{debug, error, info};
use serde_json::Deserializer;
use std::collections::HashMap;
use std::io::{BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread;
use std::time::Duration;
use uuid::Uuid;

const TCP_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Invoked serially per peer for every received message
pub type MessageHandler = Arc<dyn Fn(Uuid, Message) + Send + Sync>;
/// Invoked with (peer, connected) on connection changes
pub type ConnectionListener = Arc<dyn Fn(Uuid, bool) + Send + Sync>;

pub struct PeerNetwork {
    local_id: Uuid,
    listen_addr: String,
    peers: Mutex<HashMap<Uuid, Arc<Mutex<TcpStream>>>>,
    handler: RwLock<Option<MessageHandler>>,
    connection_listener: RwLock<Option<ConnectionListener>>,
    running: AtomicBool,
    // Back-reference to our own Arc for the threads we spawn
    me: Weak<PeerNetwork>,
}

impl PeerNetwork {
    pub fn new(listen_addr: &str) -> Arc<PeerNetwork> {
        Arc::new_cyclic(|me| PeerNetwork {
            local_id: Uuid::new_v4(),
            listen_addr: listen_addr.to_string(),
            peers: Mutex::new(HashMap::new()),
            handler: RwLock::new(None),
            connection_listener: RwLock::new(None),
            running: AtomicBool::new(false),
            me: me.clone(),
        })
    }

    fn arc(&self) -> Arc<PeerNetwork> {
        self.me
            .upgrade()
            .expect("PeerNetwork is always constructed inside an Arc")
    }

    pub fn local_id(&self) -> Uuid {
        self.local_id
    }

    pub fn set_handler(&self, handler: MessageHandler) {
        let mut slot = self
            .handler
            .write()
            .expect("Failed to acquire write lock on handler - this should never happen");
        *slot = Some(handler);
    }

    pub fn set_connection_listener(&self, listener: ConnectionListener) {
        let mut slot = self
            .connection_listener
            .write()
            .expect("Failed to acquire write lock on listener - this should never happen");
        *slot = Some(listener);
    }

    /// Start accepting incoming connections. Returns the bound address so
    /// callers may listen on an ephemeral port.
    pub fn awake(&self) -> Result<SocketAddr> {
        let listener = TcpListener::bind(&self.listen_addr).map_err(|e| {
            TangleError::Network(format!("Failed to bind to {}: {e}", self.listen_addr))
        })?;
        let bound = listener
            .local_addr()
            .map_err(|e| TangleError::Network(format!("Failed to read bound address: {e}")))?;

        self.running.store(true, Ordering::Release);
        let network = self.arc();
        thread::spawn(move || {
            for stream in listener.incoming() {
                if !network.running.load(Ordering::Acquire) {
                    break;
                }
                match stream {
                    Ok(stream) => {
                        if let Err(e) = network.register_stream(stream) {
                            error!("Error setting up incoming connection: {e}");
                        }
                    }
                    Err(e) => error!("Error accepting connection: {e}"),
                }
            }
        });

        info!("Listening for peers on {bound}");
        Ok(bound)
    }

    /// Dial a remote peer
    pub fn connect(&self, addr: &str) -> Result<()> {
        let socket_addr = addr
            .parse::<SocketAddr>()
            .map_err(|e| TangleError::Network(format!("Invalid address {addr}: {e}")))?;
        let stream = TcpStream::connect_timeout(
            &socket_addr,
            Duration::from_millis(TCP_CONNECT_TIMEOUT_MS),
        )
        .map_err(|e| TangleError::Network(format!("Failed to connect to {addr}: {e}")))?;

        self.running.store(true, Ordering::Release);
        self.register_stream(stream)
    }

    // Announce ourselves, then hand the stream to its own reader thread
    fn register_stream(&self, stream: TcpStream) -> Result<()> {
        let hello = Envelope {
            source: self.local_id,
            message: Message::Hello,
        };
        serde_json::to_writer(&stream, &hello)
            .map_err(|e| TangleError::Network(format!("Failed to send hello: {e}")))?;

        let network = self.arc();
        thread::spawn(move || network.reader_loop(stream));
        Ok(())
    }

    // One reader thread per connection; handlers for this peer run here,
    // which is what makes per-peer delivery serial
    fn reader_loop(&self, stream: TcpStream) {
        let writer = match stream.try_clone() {
            Ok(writer) => writer,
            Err(e) => {
                error!("Failed to clone peer stream: {e}");
                return;
            }
        };

        let reader = BufReader::new(&stream);
        let mut peer_id: Option<Uuid> = None;

        for envelope in Deserializer::from_reader(reader).into_iter::<Envelope>() {
            let envelope = match envelope {
                Ok(envelope) => envelope,
                Err(e) => {
                    error!("Failed to deserialize frame: {e}");
                    break;
                }
            };

            if peer_id.is_none() {
                let id = envelope.source;
                peer_id = Some(id);
                {
                    let mut peers = self
                        .peers
                        .lock()
                        .expect("Failed to acquire lock on peers - this should never happen");
                    match writer.try_clone() {
                        Ok(writer) => {
                            peers.insert(id, Arc::new(Mutex::new(writer)));
                        }
                        Err(e) => {
                            error!("Failed to register peer {id}: {e}");
                            break;
                        }
                    }
                }
                info!("Peer {id} connected");
                self.notify_connection(id, true);
            }

            if matches!(envelope.message, Message::Hello) {
                continue;
            }
            self.dispatch(envelope.source, envelope.message);
        }

        if let Some(id) = peer_id {
            let mut peers = self
                .peers
                .lock()
                .expect("Failed to acquire lock on peers - this should never happen");
            peers.remove(&id);
            drop(peers);
            info!("Peer {id} disconnected");
            self.notify_connection(id, false);
        }
        let _ = stream.shutdown(Shutdown::Both);
    }

    fn notify_connection(&self, peer: Uuid, connected: bool) {
        let listener = self
            .connection_listener
            .read()
            .expect("Failed to acquire read lock on listener - this should never happen")
            .clone();
        if let Some(listener) = listener {
            listener(peer, connected);
        }
    }

    fn dispatch(&self, source: Uuid, message: Message) {
        let handler = self
            .handler
            .read()
            .expect("Failed to acquire read lock on handler - this should never happen")
            .clone();
        match handler {
            Some(handler) => handler(source, message),
            None => debug!("No handler registered, dropping message from {source}"),
        }
    }

    /// Publish a message to every connected peer
    pub fn send(&self, message: &Message) {
        for peer in self.peers() {
            if let Err(e) = self.send_to(peer, message) {
                error!("Failed to send to {peer}: {e}");
            }
        }
    }

    /// Send a message to one peer
    pub fn send_to(&self, peer: Uuid, message: &Message) -> Result<()> {
        let stream = {
            let peers = self
                .peers
                .lock()
                .expect("Failed to acquire lock on peers - this should never happen");
            peers
                .get(&peer)
                .cloned()
                .ok_or_else(|| TangleError::Network(format!("Peer {peer} is not connected")))?
        };

        let envelope = Envelope {
            source: self.local_id,
            message: message.clone(),
        };
        let guard = stream
            .lock()
            .expect("Failed to acquire lock on peer stream - this should never happen");
        serde_json::to_writer(&*guard, &envelope)
            .map_err(|e| TangleError::Network(format!("Failed to send message: {e}")))?;
        (&*guard)
            .flush()
            .map_err(|e| TangleError::Network(format!("Failed to flush message: {e}")))?;
        Ok(())
    }

    /// Deliver a message to our own handler, synchronously, on the calling
    /// thread. Loading a tangle file relies on this ordering.
    pub fn send_to_self(&self, message: Message) {
        self.dispatch(self.local_id, message);
    }

    pub fn peers(&self) -> Vec<Uuid> {
        self.peers
            .lock()
            .expect("Failed to acquire lock on peers - this should never happen")
            .keys()
            .copied()
            .collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers
            .lock()
            .expect("Failed to acquire lock on peers - this should never happen")
            .len()
    }

    /// Stop accepting connections and drop every peer
    pub fn disconnect(&self) {
        self.running.store(false, Ordering::Release);
        let mut peers = self
            .peers
            .lock()
            .expect("Failed to acquire lock on peers - this should never happen");
        for stream in peers.values() {
            if let Ok(stream) = stream.lock() {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
        peers.clear();
        info!("Disconnected from the network");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        for _ in 0..100 {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn test_two_peers_exchange_messages() {
        let alice = PeerNetwork::new("127.0.0.1:0");
        let bob = PeerNetwork::new("127.0.0.1:0");

        let (tx, rx) = mpsc::channel::<(Uuid, Message)>();
        let sender = tx.clone();
        alice.set_handler(Arc::new(move |source, message| {
            let _ = sender.send((source, message));
        }));

        let addr = alice.awake().unwrap();
        bob.connect(&addr.to_string()).unwrap();

        assert!(wait_for(|| alice.peer_count() == 1 && bob.peer_count() == 1));

        bob.send(&Message::GenesisVoteRequest);
        let (source, message) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(source, bob.local_id());
        assert!(matches!(message, Message::GenesisVoteRequest));

        alice.disconnect();
        bob.disconnect();
    }

    #[test]
    fn test_send_to_self_is_synchronous() {
        let network = PeerNetwork::new("127.0.0.1:0");
        let (tx, rx) = mpsc::channel::<Uuid>();
        let local_id = network.local_id();
        network.set_handler(Arc::new(move |source, _| {
            let _ = tx.send(source);
        }));

        network.send_to_self(Message::UpdateWeightsRequest);
        // Already delivered by the time send_to_self returned
        assert_eq!(rx.try_recv().unwrap(), local_id);
    }

    #[test]
    fn test_send_to_unknown_peer_fails() {
        let network = PeerNetwork::new("127.0.0.1:0");
        let result = network.send_to(Uuid::new_v4(), &Message::GenesisVoteRequest);
        assert!(result.is_err());
    }
}
