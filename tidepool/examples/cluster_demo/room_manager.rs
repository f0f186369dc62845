//! A room manager actor: hands out room ids on `NewRoom`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tidepool::actors::MessageHandler;
use tidepool::{ActorError, ActorMessageInfo, ActorType, LocalActor};

/// Actor type of room managers.
pub const ROOM_MANAGER: ActorType = ActorType(0x5200_4D47);

/// Service name the room manager is published under.
pub const SERVICE: &str = "room-manager";

struct NewRoom {
    next: AtomicU64,
}

#[async_trait::async_trait]
impl MessageHandler for NewRoom {
    async fn handle(&self, info: &mut ActorMessageInfo) -> Result<(), ActorError> {
        let owner: u64 = info.message.arg(0)?;
        let room = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(owner, room, "room created");
        info.reply_with(room)
    }
}

/// Build a room manager with its `NewRoom` handler.
pub fn room_manager() -> Arc<LocalActor> {
    let actor = Arc::new(LocalActor::new(ROOM_MANAGER, 1));
    actor.add_handler(
        "NewRoom",
        NewRoom {
            next: AtomicU64::new(0),
        },
    );
    actor
}
