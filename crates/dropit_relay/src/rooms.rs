/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - DROPIT Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use std::collections::HashMap;

pub const ROOM_CAPACITY: usize = 2;

pub type MemberId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Joined (or already a member); `peer_present` tells whether the other seat is taken.
    Joined { peer_present: bool },
    Full,
}

/// Room membership table. `T` is whatever reaches a member's socket.
#[derive(Debug)]
pub struct Rooms<T> {
    rooms: HashMap<String, Vec<(MemberId, T)>>,
}

impl<T> Default for Rooms<T> {
    fn default() -> Self {
        Self {
            rooms: HashMap::new(),
        }
    }
}

impl<T: Clone> Rooms<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&mut self, room: &str, member: MemberId, sink: T) -> JoinOutcome {
        let members = self.rooms.entry(room.to_string()).or_default();
        if !members.iter().any(|(id, _)| *id == member) {
            if members.len() >= ROOM_CAPACITY {
                return JoinOutcome::Full;
            }
            members.push((member, sink));
        }
        JoinOutcome::Joined {
            peer_present: members.len() > 1,
        }
    }

    /// The other member of `room`, if `member` belongs to it.
    pub fn peer_of(&self, room: &str, member: MemberId) -> Option<T> {
        let members = self.rooms.get(room)?;
        if !members.iter().any(|(id, _)| *id == member) {
            return None;
        }
        members
            .iter()
            .find(|(id, _)| *id != member)
            .map(|(_, sink)| sink.clone())
    }

    /// Removes `member` everywhere; empty rooms are dropped.
    pub fn leave(&mut self, member: MemberId) {
        self.rooms.retain(|_, members| {
            members.retain(|(id, _)| *id != member);
            !members.is_empty()
        });
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_member_sees_first() {
        let mut rooms = Rooms::new();
        assert_eq!(rooms.join("r", 1, "a"), JoinOutcome::Joined { peer_present: false });
        assert_eq!(rooms.peer_of("r", 1), None);
        assert_eq!(rooms.join("r", 2, "b"), JoinOutcome::Joined { peer_present: true });
        assert_eq!(rooms.peer_of("r", 1), Some("b"));
        assert_eq!(rooms.peer_of("r", 2), Some("a"));
    }

    #[test]
    fn third_member_is_refused_and_rejoin_is_harmless() {
        let mut rooms = Rooms::new();
        rooms.join("r", 1, "a");
        rooms.join("r", 2, "b");
        assert_eq!(rooms.join("r", 3, "c"), JoinOutcome::Full);
        assert_eq!(rooms.join("r", 1, "a"), JoinOutcome::Joined { peer_present: true });
        assert_eq!(rooms.peer_of("r", 3), None);
    }

    #[test]
    fn non_members_cannot_reach_a_room() {
        let mut rooms = Rooms::new();
        rooms.join("r", 1, "a");
        rooms.join("s", 2, "b");
        assert_eq!(rooms.peer_of("r", 2), None);
        assert_eq!(rooms.peer_of("missing", 1), None);
    }

    #[test]
    fn leave_frees_the_seat_and_drops_empty_rooms() {
        let mut rooms = Rooms::new();
        rooms.join("r", 1, "a");
        rooms.join("r", 2, "b");
        rooms.leave(1);
        assert_eq!(rooms.peer_of("r", 2), None);
        assert_eq!(rooms.join("r", 3, "c"), JoinOutcome::Joined { peer_present: true });
        rooms.leave(2);
        rooms.leave(3);
        assert_eq!(rooms.len(), 0);
    }
}
