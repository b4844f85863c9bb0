use crate::network::ClientSession;
use log::{debug, trace, warn};
use shared::protocol::execute;
use shared::{
    Command, EntityId, InputMask, InputReplicator, Position, Simulation, World, WORLD_HEIGHT,
    WORLD_WIDTH,
};

/// Seconds between avatar requests while the server has not assigned one.
const AVATAR_REQUEST_INTERVAL: f32 = 0.5;

/// Longest the avatar's input goes unsent, keeping the server from evicting an
/// idle player.
const KEEPALIVE_INTERVAL: f32 = 1.0;

/// Client-side simulation driven once per client tick
///
/// Online, the world allocates provisional ids and the server's commands are
/// authoritative. Offline, the client owns everything and nothing is sent.
pub struct ClientGame {
    pub world: World,
    pub tick: u32,
    inputs: InputReplicator,
    online: bool,
    since_avatar_request: f32,
    since_input_sent: f32,
}

impl ClientGame {
    pub fn new(online: bool) -> Self {
        let mut world = if online {
            World::networked_client()
        } else {
            World::authoritative()
        };

        if !online {
            match world.spawn(Position::new(WORLD_WIDTH / 2.0, WORLD_HEIGHT / 2.0)) {
                Ok(avatar) => world.assign_avatar(avatar),
                Err(e) => warn!("Cannot spawn offline avatar: {}", e),
            }
        }

        Self {
            world,
            tick: 0,
            inputs: InputReplicator::new(),
            online,
            since_avatar_request: AVATAR_REQUEST_INTERVAL,
            since_input_sent: KEEPALIVE_INTERVAL,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn avatar(&self) -> Option<EntityId> {
        self.world.avatar()
    }

    pub fn tick(&mut self, session: &ClientSession, input: InputMask, dt: f32) {
        self.since_avatar_request += dt;
        self.since_input_sent += dt;

        for message in session.drain_incoming() {
            let previous = self.world.avatar();
            match execute(&message.payload, &mut self.world) {
                Ok(Command::AssignAvatar { entity }) => self.replace_avatar(previous, entity),
                Ok(command) => trace!("Server: {:?}", command),
                Err(e) => warn!("Dropping command from server: {}", e),
            }
        }

        if self.online
            && self.world.avatar().is_none()
            && self.since_avatar_request >= AVATAR_REQUEST_INTERVAL
        {
            // The server answers any AssignAvatar from a client with the real one.
            session.send_command(&Command::AssignAvatar {
                entity: EntityId(u32::MAX),
            });
            self.since_avatar_request = 0.0;
        }

        let mut mask = input;
        if mask.contains(InputMask::FIRE) {
            mask.remove(InputMask::FIRE);
            self.fire(session);
        }

        let avatar = self.world.avatar();
        if let Some(avatar) = avatar {
            self.world.set_input(avatar, mask);
        }

        let mut avatar_sent = false;
        for command in self.inputs.collect(&self.world) {
            avatar_sent |= matches!(
                command,
                Command::UpdateInput { entity, .. } if Some(entity) == avatar
            );
            session.send_command(&command);
        }

        if let Some(avatar) = avatar.filter(|_| self.online) {
            if !avatar_sent && self.since_input_sent >= KEEPALIVE_INTERVAL {
                session.send_command(&Command::UpdateInput {
                    entity: avatar,
                    mask,
                });
                avatar_sent = true;
            }
            if avatar_sent {
                self.since_input_sent = 0.0;
            }
        }

        self.world.step(dt);
        self.tick += 1;
    }

    /// Drops the entity the server previously had us drive, so a client
    /// reassigned after an eviction does not keep its old avatar around
    fn replace_avatar(&mut self, previous: Option<EntityId>, current: EntityId) {
        let Some(previous) = previous.filter(|previous| *previous != current) else {
            return;
        };

        debug!("Avatar moved from {} to {}", previous, current);
        self.world.destroy_entity(previous);
        self.inputs.invalidate(previous);
    }

    /// Spawns a locally owned entity where the avatar stands
    fn fire(&mut self, session: &ClientSession) {
        let Some(position) = self.world.avatar().and_then(|a| self.world.position_of(a)) else {
            return;
        };

        let entity = match self.world.spawn(position) {
            Ok(entity) => entity,
            Err(e) => {
                warn!("Cannot spawn entity: {}", e);
                return;
            }
        };

        debug!("Fired {}", entity);
        if self.online {
            session.send_command(&Command::CreateEntity { entity, position });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ClientConfig;
    use assert_approx_eq::assert_approx_eq;
    use shared::ENTITY_SPEED;
    use std::net::{SocketAddr, UdpSocket};
    use std::thread;
    use std::time::{Duration, Instant};

    fn fake_server() -> (UdpSocket, ClientSession) {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        server
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        let port = server.local_addr().unwrap().port();
        let session = ClientSession::connect(ClientConfig::new("127.0.0.1", port)).unwrap();
        (server, session)
    }

    /// Everything the client sent until the line went quiet
    fn received(server: &UdpSocket) -> Vec<Command> {
        let mut buf = [0u8; 1500];
        let mut commands = Vec::new();
        while let Ok((len, _)) = server.recv_from(&mut buf) {
            if len > 0 {
                commands.push(Command::decode(&buf[..len]).unwrap());
            }
        }
        commands
    }

    fn input_updates(commands: &[Command]) -> usize {
        commands
            .iter()
            .filter(|command| matches!(command, Command::UpdateInput { .. }))
            .count()
    }

    fn online_with_avatar() -> ClientGame {
        let mut game = ClientGame::new(true);
        game.world.create_entity(EntityId(0), Position::default());
        game.world.assign_avatar(EntityId(0));
        game
    }

    fn send(server: &UdpSocket, client: SocketAddr, command: Command) {
        server.send_to(&command.encode().unwrap(), client).unwrap();
    }

    fn tick_until(
        game: &mut ClientGame,
        session: &ClientSession,
        mut done: impl FnMut(&ClientGame) -> bool,
    ) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            game.tick(session, InputMask::NONE, 1.0 / 60.0);
            if done(game) {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_offline_game_owns_its_avatar() {
        let session = ClientSession::offline();
        let mut game = ClientGame::new(false);

        let avatar = game.avatar().unwrap();
        assert!(!avatar.is_provisional());
        let start = game.world.position_of(avatar).unwrap();

        game.tick(&session, InputMask::RIGHT, 0.1);

        let position = game.world.position_of(avatar).unwrap();
        assert_approx_eq!(position.x, start.x + ENTITY_SPEED * 0.1, 0.001);
        assert_approx_eq!(position.y, start.y, 0.001);
        assert_eq!(game.tick, 1);
    }

    #[test]
    fn test_offline_fire_spawns_authoritative_entity() {
        let session = ClientSession::offline();
        let mut game = ClientGame::new(false);

        game.tick(&session, InputMask::FIRE, 0.1);

        assert_eq!(game.world.len(), 2);
        assert!(game.world.contains(EntityId(1)));
        assert!(game.world.provisional_entities().is_empty());
        // FIRE never reaches the avatar's mask
        assert_eq!(
            game.world.input_of(game.avatar().unwrap()),
            Some(InputMask::NONE)
        );
    }

    #[test]
    fn test_online_game_waits_for_avatar() {
        let session = ClientSession::offline();
        let mut game = ClientGame::new(true);

        assert!(game.avatar().is_none());
        game.tick(&session, InputMask::LEFT | InputMask::FIRE, 0.1);

        // No avatar yet, so there is nothing to move or fire from
        assert!(game.world.is_empty());
    }

    #[test]
    fn test_one_datagram_per_input_change() {
        let (server, session) = fake_server();
        let mut game = online_with_avatar();

        // Keep-alive is due on the first tick as well
        game.tick(&session, InputMask::RIGHT, 1.0 / 60.0);
        let sent = received(&server);
        assert_eq!(input_updates(&sent), 1);
        assert!(sent.contains(&Command::UpdateInput {
            entity: EntityId(0),
            mask: InputMask::RIGHT
        }));

        game.tick(&session, InputMask::RIGHT, 1.0 / 60.0);
        assert_eq!(input_updates(&received(&server)), 0);
    }

    #[test]
    fn test_keepalive_follows_time_not_ticks() {
        let (server, session) = fake_server();
        let mut game = online_with_avatar();

        // Two ticks per second: the unchanged input goes out every other tick
        for _ in 0..4 {
            game.tick(&session, InputMask::NONE, 0.5);
        }

        let sent = received(&server);
        assert_eq!(input_updates(&sent), 2);
    }

    #[test]
    fn test_reassigned_avatar_replaces_the_old_one() {
        let (server, session) = fake_server();
        let mut game = ClientGame::new(true);

        session.send(b"hello".to_vec()).unwrap();
        let mut buf = [0u8; 64];
        let (_, client) = server.recv_from(&mut buf).unwrap();

        let position = Position::new(10.0, 10.0);
        send(&server, client, Command::CreateEntity { entity: EntityId(0), position });
        send(&server, client, Command::AssignAvatar { entity: EntityId(0) });
        assert!(tick_until(&mut game, &session, |g| g.avatar() == Some(EntityId(0))));

        send(&server, client, Command::CreateEntity { entity: EntityId(5), position });
        send(&server, client, Command::AssignAvatar { entity: EntityId(5) });
        assert!(tick_until(&mut game, &session, |g| g.avatar() == Some(EntityId(5))));

        assert!(!game.world.contains(EntityId(0)));
        assert!(game.world.contains(EntityId(5)));
        assert_eq!(game.world.len(), 1);
    }
}
