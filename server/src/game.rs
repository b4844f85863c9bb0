use log::{debug, info, warn};
use shared::protocol::enqueue_command;
use shared::{
    ClientId, Command, EntityId, InputReplicator, MessageQueue, Peer, Position, Simulation,
    World, WORLD_HEIGHT, WORLD_WIDTH,
};
use std::collections::{BTreeMap, VecDeque};

/// Seconds an entity fired by a client lives before the server removes it.
const FIRED_ENTITY_LIFETIME: f32 = 3.0;

/// Fired entities one client may have alive at once; firing past this removes
/// the oldest.
const MAX_FIRED_PER_CLIENT: usize = 32;

/// Existing entities replayed to a joining client per tick.
const REPLAY_BATCH: usize = 64;

/// Authoritative simulation driven once per server tick
///
/// Each tick drains everything the network thread queued, applies it, steps
/// the world and queues the resulting authoritative updates.
pub struct ServerGame {
    pub world: World,
    pub tick: u32,
    avatars: BTreeMap<ClientId, EntityId>,
    // Promoted entities per client with their expiry time, oldest first
    fired: BTreeMap<ClientId, VecDeque<(EntityId, f32)>>,
    // Entities still to be sent to clients that joined recently
    replays: BTreeMap<ClientId, VecDeque<EntityId>>,
    inputs: InputReplicator,
    clock: f32,
}

impl ServerGame {
    pub fn new() -> Self {
        Self {
            world: World::authoritative(),
            tick: 0,
            avatars: BTreeMap::new(),
            fired: BTreeMap::new(),
            replays: BTreeMap::new(),
            inputs: InputReplicator::new(),
            clock: 0.0,
        }
    }

    pub fn avatar_of(&self, client_id: ClientId) -> Option<EntityId> {
        self.avatars.get(&client_id).copied()
    }

    /// Entities fired by `client_id` that are still alive, oldest first
    pub fn fired_by(&self, client_id: ClientId) -> Vec<EntityId> {
        self.fired
            .get(&client_id)
            .map(|fired| fired.iter().map(|(entity, _)| *entity).collect())
            .unwrap_or_default()
    }

    pub fn tick(&mut self, incoming: &MessageQueue, outgoing: &MessageQueue, dt: f32) {
        self.clock += dt;

        for message in incoming.drain() {
            match message.peer {
                Peer::Client(client_id) => self.handle_message(client_id, &message.payload, outgoing),
                Peer::All => warn!("Ignoring inbound message without a sender"),
            }
        }

        self.remove_departed_clients(outgoing);
        self.expire_fired(outgoing);
        self.flush_replays(outgoing);

        for entity in self.world.step(dt) {
            if let Some(position) = self.world.position_of(entity) {
                enqueue_command(outgoing, Peer::All, &Command::SetPosition { entity, position });
            }
        }

        for command in self.inputs.collect(&self.world) {
            enqueue_command(outgoing, Peer::All, &command);
        }

        self.tick += 1;
    }

    fn handle_message(&mut self, client_id: ClientId, payload: &[u8], outgoing: &MessageQueue) {
        let joined = !self.avatars.contains_key(&client_id);
        if joined {
            self.spawn_avatar(client_id, outgoing);
        }

        let command = match Command::decode(payload) {
            Ok(command) => command,
            Err(e) => {
                warn!("Dropping command from client {}: {}", client_id, e);
                return;
            }
        };

        match command {
            Command::CreateEntity { entity, position } if entity.is_provisional() => {
                self.promote(client_id, entity, position, outgoing);
            }
            Command::UpdateInput { entity, .. } if self.avatar_of(client_id) != Some(entity) => {
                warn!("Client {} tried to drive {} it does not control", client_id, entity);
            }
            Command::AssignAvatar { .. } => {
                if !joined {
                    self.resend_avatar(client_id, outgoing);
                }
            }
            command @ (Command::UpdateInput { .. } | Command::Unknown { .. }) => {
                if let Err(e) = command.apply(&mut self.world) {
                    warn!("Failed to apply command from client {}: {}", client_id, e);
                }
            }
            other => {
                warn!("Ignoring {:?} from client {}", other, client_id);
            }
        }
    }

    /// Gives a newly seen client its own entity and the current world state
    fn spawn_avatar(&mut self, client_id: ClientId, outgoing: &MessageQueue) {
        let spawn = Position::new(
            100.0 + (client_id as f32 * 60.0) % (WORLD_WIDTH - 200.0),
            WORLD_HEIGHT / 2.0,
        );

        let avatar = match self.world.spawn(spawn) {
            Ok(entity) => entity,
            Err(e) => {
                warn!("Cannot spawn avatar for client {}: {}", client_id, e);
                return;
            }
        };
        self.avatars.insert(client_id, avatar);
        info!("Client {} controls {}", client_id, avatar);

        let peer = Peer::Client(client_id);
        enqueue_command(
            outgoing,
            Peer::All,
            &Command::CreateEntity {
                entity: avatar,
                position: spawn,
            },
        );
        enqueue_command(outgoing, peer, &Command::AssignAvatar { entity: avatar });

        let existing: VecDeque<EntityId> = self
            .world
            .owned_entities()
            .into_iter()
            .filter(|entity| *entity != avatar)
            .collect();
        if !existing.is_empty() {
            self.replays.insert(client_id, existing);
        }
    }

    /// Answers a repeated avatar request, in case the first answer was lost
    fn resend_avatar(&self, client_id: ClientId, outgoing: &MessageQueue) {
        let Some(avatar) = self.avatar_of(client_id) else {
            return;
        };
        let Some(position) = self.world.position_of(avatar) else {
            return;
        };

        debug!("Resending {} to client {}", avatar, client_id);
        let peer = Peer::Client(client_id);
        enqueue_command(outgoing, peer, &Command::CreateEntity { entity: avatar, position });
        enqueue_command(outgoing, peer, &Command::AssignAvatar { entity: avatar });
    }

    /// Replaces a client's provisional entity with an authoritative one
    fn promote(
        &mut self,
        client_id: ClientId,
        provisional: EntityId,
        position: Position,
        outgoing: &MessageQueue,
    ) {
        let entity = match self.world.spawn(position) {
            Ok(entity) => entity,
            Err(e) => {
                warn!("Cannot promote {} from client {}: {}", provisional, client_id, e);
                return;
            }
        };

        debug!("Promoted {} from client {} to {}", provisional, client_id, entity);
        enqueue_command(outgoing, Peer::All, &Command::CreateEntity { entity, position });
        enqueue_command(
            outgoing,
            Peer::Client(client_id),
            &Command::DestroyEntity {
                entity: provisional,
            },
        );

        let fired = self.fired.entry(client_id).or_default();
        fired.push_back((entity, self.clock + FIRED_ENTITY_LIFETIME));
        let oldest = if fired.len() > MAX_FIRED_PER_CLIENT {
            fired.pop_front()
        } else {
            None
        };
        if let Some((oldest, _)) = oldest {
            self.despawn(oldest, outgoing);
        }
    }

    /// Removes fired entities whose lifetime has run out
    fn expire_fired(&mut self, outgoing: &MessageQueue) {
        let mut expired = Vec::new();
        for fired in self.fired.values_mut() {
            while let Some(&(entity, expires_at)) = fired.front() {
                if expires_at > self.clock {
                    break;
                }
                fired.pop_front();
                expired.push(entity);
            }
        }
        self.fired.retain(|_, fired| !fired.is_empty());

        for entity in expired {
            self.despawn(entity, outgoing);
        }
    }

    /// Sends joining clients the next batch of entities that existed before them
    fn flush_replays(&mut self, outgoing: &MessageQueue) {
        for (client_id, pending) in self.replays.iter_mut() {
            let mut sent = 0;
            while sent < REPLAY_BATCH {
                let Some(&entity) = pending.front() else {
                    break;
                };
                if let Some(position) = self.world.position_of(entity) {
                    let create = Command::CreateEntity { entity, position };
                    if !enqueue_command(outgoing, Peer::Client(*client_id), &create) {
                        break;
                    }
                    sent += 1;
                }
                pending.pop_front();
            }
        }
        self.replays.retain(|_, pending| !pending.is_empty());
    }

    fn despawn(&mut self, entity: EntityId, outgoing: &MessageQueue) {
        if self.world.destroy_entity(entity) {
            enqueue_command(outgoing, Peer::All, &Command::DestroyEntity { entity });
        }
    }

    /// Drops the avatars of clients the network thread no longer sends to
    fn remove_departed_clients(&mut self, outgoing: &MessageQueue) {
        let departed: Vec<ClientId> = self
            .avatars
            .keys()
            .copied()
            .filter(|client_id| !outgoing.has_recipient(*client_id))
            .collect();

        for client_id in departed {
            self.replays.remove(&client_id);
            if let Some(avatar) = self.avatars.remove(&client_id) {
                info!("Client {} left, removing {}", client_id, avatar);
                self.despawn(avatar, outgoing);
            }
            for (entity, _) in self.fired.remove(&client_id).unwrap_or_default() {
                self.despawn(entity, outgoing);
            }
        }
    }
}

impl Default for ServerGame {
    fn default() -> Self {
        Self::new()
    }
}
