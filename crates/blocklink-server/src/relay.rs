//! Chat relay run by the server binary.
//!
//! Rebroadcasts every `TEXT` message, stamped with its sender, to all
//! connected clients and disconnects clients that send `EXIT`. Handlers run
//! on the sender's read loop, so they only queue [`ServerCommand`]s; a
//! separate task carries them out.

use blocklink_core::SubscriptionId;
use blocklink_proto::{Message, keys};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::server::{MessageServer, ServerCommand};

/// Relay installed on a server.
pub struct Relay {
    server: MessageServer<Message>,
    subscriptions: [SubscriptionId; 2],
    task: JoinHandle<()>,
}

impl Relay {
    /// Subscribe the relay handlers on `server` and start the command task.
    pub fn install(server: &MessageServer<Message>) -> Self {
        let (commands, queue) = mpsc::unbounded_channel();

        let text_commands = commands.clone();
        let text = server.subscribe(keys::TEXT, move |message: &Message, delivery| {
            let stamped = message.clone().with_client_id(delivery.connection);
            let _ = text_commands.send(ServerCommand::Broadcast(stamped));
        });
        let exit = server.subscribe(keys::EXIT, move |_: &Message, delivery| {
            let _ = commands.send(ServerCommand::Disconnect(delivery.connection));
        });

        let task = tokio::spawn(run(server.clone(), queue));
        Self { server: server.clone(), subscriptions: [text, exit], task }
    }

    /// Remove the handlers and wait for queued commands to finish.
    pub async fn remove(self) {
        for id in self.subscriptions {
            self.server.unsubscribe(id);
        }
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "relay task ended abnormally");
        }
    }
}

async fn run(server: MessageServer<Message>, mut queue: mpsc::UnboundedReceiver<ServerCommand<Message>>) {
    while let Some(command) = queue.recv().await {
        tracing::trace!(?command, "relay command");
        server.handle_command(command).await;
    }
}
