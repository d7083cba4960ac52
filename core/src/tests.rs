//! Cross-module tests for the tracker core

#[cfg(test)]
mod tests {
    use crate::{Config, Dispatcher, Message, Prefix, Snapshot, StateStore};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn tracker() -> (Dispatcher, StateStore) {
        let mut config = Config::default();
        config.identity.nick = "bot".to_string();
        (Dispatcher::new(&config).unwrap(), StateStore::new("bot", 16, 16))
    }

    fn feed(dispatcher: &mut Dispatcher, store: &StateStore, lines: &[&str]) {
        for line in lines {
            dispatcher.dispatch_line(store, line);
        }
    }

    fn consistent(snapshot: &Snapshot, old: &str, new: &str) -> bool {
        let a = snapshot.channel("#a").unwrap();
        let b = snapshot.channel("#b").unwrap();
        let all_old = a.has_member(old) && b.has_member(old) && !a.has_member(new) && !b.has_member(new);
        let all_new = a.has_member(new) && b.has_member(new) && !a.has_member(old) && !b.has_member(old);
        let user_old = snapshot.user(old).is_some() && snapshot.user(new).is_none();
        let user_new = snapshot.user(new).is_some() && snapshot.user(old).is_none();
        (all_old && user_old) || (all_new && user_new)
    }

    #[test]
    fn test_nick_rename_is_atomic_for_readers() {
        let (mut dispatcher, store) = tracker();
        feed(
            &mut dispatcher,
            &store,
            &[
                ":bot!b@h JOIN #a",
                ":bot!b@h JOIN #b",
                ":alice!a@h JOIN #a",
                ":alice!a@h JOIN #b",
            ],
        );

        let done = Arc::new(AtomicBool::new(false));
        let reader = {
            let store = store.clone();
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let mut checked = 0u32;
                while !done.load(Ordering::Relaxed) || checked == 0 {
                    assert!(consistent(&store.snapshot(), "alice", "alicia"));
                    checked += 1;
                }
                checked
            })
        };

        for _ in 0..500 {
            feed(
                &mut dispatcher,
                &store,
                &[":alice!a@h NICK alicia", ":alicia!a@h NICK alice"],
            );
        }
        done.store(true, Ordering::Relaxed);
        assert!(reader.join().unwrap() > 0);
    }

    #[test]
    fn test_quit_leaves_no_references() {
        let (mut dispatcher, store) = tracker();
        feed(
            &mut dispatcher,
            &store,
            &[
                ":bot!b@h JOIN #a",
                ":bot!b@h JOIN #b",
                ":carol!c@h JOIN #a",
                ":carol!c@h JOIN #b",
                ":carol!c@h QUIT :Client Quit",
            ],
        );
        let snapshot = store.snapshot();
        assert!(snapshot.channels.iter().all(|c| !c.has_member("carol")));
        assert!(snapshot.user("carol").is_none());
        assert_eq!(snapshot.channels.len(), 2);
    }

    #[test]
    fn test_membership_stays_bidirectional() {
        let (mut dispatcher, store) = tracker();
        feed(
            &mut dispatcher,
            &store,
            &[
                ":bot!b@h JOIN #a",
                ":bot!b@h JOIN #b",
                ":dave!d@h JOIN #a",
                ":dave!d@h JOIN #b",
                ":op!o@h KICK #a dave :out",
                ":erin!e@h JOIN #b",
                ":erin!e@h NICK Erin2",
                ":Erin2!e@h PART #b",
            ],
        );
        store.read(|state| {
            for (channel_key, channel) in &state.channels {
                for nick_key in channel.members.keys() {
                    assert!(state.users[nick_key].is_in_channel(channel_key));
                }
            }
            for (nick_key, user) in &state.users {
                for channel_key in &user.channels {
                    assert!(state.channels[channel_key].has_member(nick_key));
                }
            }
            assert!(state.user("erin2").is_none());
            assert_eq!(state.user("dave").unwrap().channels.len(), 1);
        });
    }

    #[test]
    fn test_rejoin_list_ignores_channels_seen_only_in_replies() {
        let (mut dispatcher, store) = tracker();
        feed(
            &mut dispatcher,
            &store,
            &[
                ":irc.example.net 001 bot :Welcome",
                ":bot!b@h JOIN #home",
                ":irc.example.net 332 bot #elsewhere :some topic",
                ":irc.example.net 353 bot = #other :alice bob",
                ":irc.example.net 366 bot #other :End of /NAMES list.",
            ],
        );

        let snapshot = store.snapshot();
        assert!(snapshot.channel("#elsewhere").is_some());
        assert!(snapshot.channel("#other").is_some());

        assert_eq!(store.reset_for_reconnect(), vec!["#home"]);
        assert!(store.snapshot().channels.is_empty());
    }

    #[test]
    fn test_privmsg_round_trip_through_prefix() {
        let msg = Message::with_prefix(
            Prefix::parse("alice!al@example.org"),
            "PRIVMSG",
            vec!["#rust".to_string(), "spaces  are   kept".to_string()],
        );
        let parsed = Message::parse(&msg.to_wire()).unwrap();
        assert_eq!(parsed, msg);
        assert_eq!(parsed.source_nick(), Some("alice"));
    }
}
