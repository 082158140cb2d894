//! The rendering rule catalog.
//!
//! Each `Variant` is the value carried by one node of the standard rule tree
//! and knows how to narrate the events that node accepts. Sibling order in
//! `standard_tree` matters: specific cases are added before general ones.

use tracing::{debug, warn};

use super::matcher::{Rule, RuleTree, Shape};
use super::text::format_timestamp;
use super::{Fragment, RenderContext, RenderError, Tone};
use crate::event::Event;
use crate::event::local::{COMMAND_ERROR, COMMAND_HELP, COMMAND_OUTPUT, LOCAL_SOURCE};
use crate::room::RoomContext;

const MEMBERSHIPS: &[&str] = &["invite", "join", "ban", "leave", "knock"];
const JOIN_RULES: &[&str] = &["public", "invite", "knock", "private"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Variant {
    Unknown,
    Event,
    LocalOutput,
    CommandOutput,
    CommandHelp,
    CommandError,
    RoomEvent,
    Redacted,
    Redaction,
    StateEvent,
    RoomAliases,
    CanonicalAlias,
    RoomCreate,
    JoinRules,
    RoomMember,
    MemberJoin,
    DisplayNameChanged,
    ProfileChanged,
    MemberInvite,
    InviteRepeated,
    MemberLeave,
    LeaveRepeated,
    Unban,
    Uninvite,
    Kicked,
    MemberBan,
    KickBan,
    PowerLevels,
    RoomName,
    RoomTopic,
    RoomMessage,
    TextMessage,
    EmoteMessage,
    NoticeMessage,
}

pub fn standard_tree() -> RuleTree<Variant> {
    let mut tree = RuleTree::new(Rule::new("unknown", Shape::any(), Variant::Unknown));
    let root = tree.root();

    let event = tree.add_child(
        root,
        Rule::new(
            "event",
            Shape::any().string("type").object("content"),
            Variant::Event,
        ),
    );

    let local = tree.add_child(
        event,
        Rule::new(
            "local-output",
            Shape::any().literal("source", LOCAL_SOURCE),
            Variant::LocalOutput,
        ),
    );
    for (name, kind, variant) in [
        ("command-output", COMMAND_OUTPUT, Variant::CommandOutput),
        ("command-help", COMMAND_HELP, Variant::CommandHelp),
        ("command-error", COMMAND_ERROR, Variant::CommandError),
    ] {
        tree.add_child(
            local,
            Rule::new(
                name,
                Shape::any()
                    .literal("type", kind)
                    .nested("content", Shape::any().string("command").string("message")),
                variant,
            ),
        );
    }

    let room_event = tree.add_child(
        event,
        Rule::new(
            "room-event",
            Shape::any()
                .string("event_id")
                .string("sender")
                .integer("origin_server_ts"),
            Variant::RoomEvent,
        ),
    );
    tree.add_child(
        room_event,
        Rule::new(
            "redacted",
            Shape::any().nested(
                "unsigned",
                Shape::any().nested("redacted_because", Shape::any().string("event_id")),
            ),
            Variant::Redacted,
        ),
    );
    tree.add_child(
        room_event,
        Rule::new(
            "redaction",
            Shape::any()
                .literal("type", "m.room.redaction")
                .string("redacts"),
            Variant::Redaction,
        ),
    );

    let state = tree.add_child(
        room_event,
        Rule::new("state-event", Shape::any().string("state_key"), Variant::StateEvent),
    );
    tree.add_child(
        state,
        Rule::new(
            "room-aliases",
            Shape::any()
                .literal("type", "m.room.aliases")
                .nested("content", Shape::any().array("aliases")),
            Variant::RoomAliases,
        ),
    );
    tree.add_child(
        state,
        Rule::new(
            "canonical-alias",
            Shape::any()
                .literal("type", "m.room.canonical_alias")
                .nested("content", Shape::any().string("alias")),
            Variant::CanonicalAlias,
        ),
    );
    tree.add_child(
        state,
        Rule::new(
            "room-create",
            Shape::any()
                .literal("type", "m.room.create")
                .nested("content", Shape::any().string("creator")),
            Variant::RoomCreate,
        ),
    );
    tree.add_child(
        state,
        Rule::new(
            "join-rules",
            Shape::any()
                .literal("type", "m.room.join_rules")
                .nested("content", Shape::any().one_of("join_rule", JOIN_RULES)),
            Variant::JoinRules,
        ),
    );

    let member = tree.add_child(
        state,
        Rule::new(
            "room-member",
            Shape::any()
                .literal("type", "m.room.member")
                .nested("content", Shape::any().one_of("membership", MEMBERSHIPS)),
            Variant::RoomMember,
        ),
    );
    add_membership_rules(&mut tree, member);

    tree.add_child(
        state,
        Rule::new(
            "power-levels",
            Shape::any().literal("type", "m.room.power_levels"),
            Variant::PowerLevels,
        ),
    );
    tree.add_child(
        state,
        Rule::new(
            "room-name",
            Shape::any()
                .literal("type", "m.room.name")
                .nested("content", Shape::any().string("name")),
            Variant::RoomName,
        ),
    );
    tree.add_child(
        state,
        Rule::new(
            "room-topic",
            Shape::any()
                .literal("type", "m.room.topic")
                .nested("content", Shape::any().string("topic")),
            Variant::RoomTopic,
        ),
    );

    let message = tree.add_child(
        room_event,
        Rule::new(
            "room-message",
            Shape::any().literal("type", "m.room.message").nested(
                "content",
                Shape::any().string("body").string("msgtype"),
            ),
            Variant::RoomMessage,
        ),
    );
    for (name, msgtype, variant) in [
        ("text-message", "m.text", Variant::TextMessage),
        ("emote-message", "m.emote", Variant::EmoteMessage),
        ("notice-message", "m.notice", Variant::NoticeMessage),
    ] {
        tree.add_child(
            message,
            Rule::new(
                name,
                Shape::any().nested("content", Shape::any().literal("msgtype", msgtype)),
                variant,
            ),
        );
    }

    tree
}

fn membership(value: &str) -> Shape {
    Shape::any().nested("content", Shape::any().literal("membership", value))
}

fn previous(value: &str) -> Shape {
    Shape::any().nested("prev_content", Shape::any().literal("membership", value))
}

fn add_membership_rules(
    tree: &mut RuleTree<Variant>,
    member: super::matcher::NodeId,
) {
    let join = tree.add_child(
        member,
        Rule::new("member-join", membership("join"), Variant::MemberJoin),
    );
    tree.add_child(
        join,
        Rule::new(
            "display-name-changed",
            Shape::any().nested(
                "prev_content",
                Shape::any().literal("membership", "join").string("displayname"),
            ),
            Variant::DisplayNameChanged,
        )
        .with_guard(|event| {
            event.str_at("content.displayname") != event.str_at("prev_content.displayname")
        }),
    );
    tree.add_child(
        join,
        Rule::new("profile-changed", previous("join"), Variant::ProfileChanged),
    );

    let invite = tree.add_child(
        member,
        Rule::new("member-invite", membership("invite"), Variant::MemberInvite),
    );
    tree.add_child(
        invite,
        Rule::new("invite-repeated", previous("invite"), Variant::InviteRepeated),
    );

    let leave = tree.add_child(
        member,
        Rule::new("member-leave", membership("leave"), Variant::MemberLeave),
    );
    tree.add_child(
        leave,
        Rule::new("leave-repeated", previous("leave"), Variant::LeaveRepeated),
    );
    tree.add_child(leave, Rule::new("unban", previous("ban"), Variant::Unban));
    tree.add_child(
        leave,
        Rule::new("uninvite", previous("invite"), Variant::Uninvite),
    );
    tree.add_child(
        leave,
        Rule::new("kicked", previous("join"), Variant::Kicked)
            .with_guard(|event| event.state_key() != event.sender()),
    );

    let ban = tree.add_child(
        member,
        Rule::new("member-ban", membership("ban"), Variant::MemberBan),
    );
    tree.add_child(ban, Rule::new("kick-ban", previous("join"), Variant::KickBan));
}

impl Variant {
    pub fn render(
        self,
        event: &Event,
        room: &dyn RoomContext,
        ctx: &RenderContext,
    ) -> Result<Vec<Fragment>, RenderError> {
        let parts = Parts { event, room, ctx };
        let fragments = match self {
            Variant::Unknown | Variant::Event | Variant::RoomEvent | Variant::StateEvent => {
                warn!(
                    target = "client::render",
                    event_id = ?event.event_id(),
                    "unknown or mangled event"
                );
                vec![Fragment::new(
                    format!("Received unknown or mangled event: {}", event.to_json()),
                    Tone::Alert,
                )]
            }
            Variant::LocalOutput => {
                warn!(target = "client::render", "unknown client output");
                vec![Fragment::new(
                    format!("Unknown client output: {}", event.to_json()),
                    Tone::Alert,
                )]
            }
            Variant::CommandOutput | Variant::CommandHelp | Variant::CommandError => {
                let command = parts.field("content.command")?;
                let message = parts.field("content.message")?;
                let tone = if self == Variant::CommandError {
                    Tone::Alert
                } else {
                    Tone::Normal
                };
                vec![
                    Fragment::new(format!("{command}: "), Tone::Emphasized),
                    Fragment::new(message, tone),
                ]
            }
            Variant::Redacted => {
                let by = parts.field("unsigned.redacted_because.event_id")?;
                parts.with_sender(" - ", format!(": [REDACTED BY EVENT {by}]"))?
            }
            Variant::Redaction => {
                let redacts = parts.field("redacts")?;
                let text = match event.str_at("content.reason") {
                    Some(reason) => format!(" redacted event {redacts} for reason: {reason}."),
                    None => format!(" redacted event {redacts}."),
                };
                parts.with_sender(" - ", text)?
            }
            Variant::RoomAliases
            | Variant::InviteRepeated
            | Variant::LeaveRepeated
            | Variant::PowerLevels => Vec::new(),
            Variant::CanonicalAlias => {
                let alias = parts.field("content.alias")?;
                parts.with_sender(
                    " - ",
                    format!(" changed the room's canonical alias to {alias}."),
                )?
            }
            Variant::RoomCreate => parts.with_sender(" - ", " created the room.".to_string())?,
            Variant::JoinRules => {
                let rule = match parts.field("content.join_rule")? {
                    "public" => "public",
                    "invite" => "invite-only",
                    "knock" => "knock-only",
                    _ => "private",
                };
                parts.with_sender(" - ", format!(" set the room to {rule}."))?
            }
            Variant::RoomMember => {
                let target = parts.target()?;
                let membership = parts.field("content.membership")?;
                parts.with_sender(
                    " - ",
                    format!(" changed {target}'s membership status to {membership}."),
                )?
            }
            Variant::MemberJoin => parts.with_sender(" - ", " joined the room.".to_string())?,
            Variant::DisplayNameChanged => {
                let old = parts.field("prev_content.displayname")?;
                let new = match event.str_at("content.displayname") {
                    Some(name) => name,
                    None => parts.field("state_key")?,
                };
                parts.narrate(vec![
                    Fragment::new(old, Tone::Emphasized),
                    Fragment::new(" changed their display name to ", Tone::Normal),
                    Fragment::new(new, Tone::Emphasized),
                    Fragment::new(".", Tone::Normal),
                ])?
            }
            Variant::ProfileChanged => {
                parts.with_sender(" - ", " changed their avatar.".to_string())?
            }
            Variant::MemberInvite => {
                let target = parts.target()?;
                parts.with_sender(" - ", format!(" invited {target} to the room."))?
            }
            Variant::MemberLeave => {
                let target = parts.target()?;
                parts.narrate(vec![
                    Fragment::new(target, Tone::Emphasized),
                    Fragment::new(" left the room.", Tone::Normal),
                ])?
            }
            Variant::Unban => {
                let target = parts.target()?;
                parts.with_sender(" - ", format!(" unbanned {target}."))?
            }
            Variant::Uninvite => {
                let target = parts.target()?;
                parts.with_sender(" - ", format!(" rescinded the invitation to {target}."))?
            }
            Variant::Kicked => {
                let target = parts.target()?;
                parts.with_sender(" - ", format!(" kicked {target}."))?
            }
            Variant::MemberBan => {
                let target = parts.target()?;
                parts.with_sender(" - ", format!(" banned {target}."))?
            }
            Variant::KickBan => {
                let target = parts.target()?;
                parts.with_sender(" - ", format!(" kicked and banned {target}."))?
            }
            Variant::RoomName => {
                let name = parts.field("content.name")?;
                parts.with_sender(" - ", format!(" changed the room name to {name}."))?
            }
            Variant::RoomTopic => {
                let topic = parts.field("content.topic")?;
                parts.with_sender(" - ", format!(" changed the room's topic to {topic}."))?
            }
            Variant::RoomMessage | Variant::TextMessage | Variant::NoticeMessage => {
                let body = parts.field("content.body")?;
                let tone = if self == Variant::NoticeMessage {
                    Tone::Dimmed
                } else {
                    Tone::Normal
                };
                let mut fragments = parts.with_sender(" - ", ": ".to_string())?;
                fragments.push(Fragment::new(body, tone));
                fragments
            }
            Variant::EmoteMessage => {
                let body = parts.field("content.body")?;
                let mut fragments = parts.with_sender(" * ", " ".to_string())?;
                fragments.push(Fragment::new(body, Tone::Emphasized));
                fragments
            }
        };
        Ok(fragments)
    }

    /// Whether events of this kind change how member names resolve.
    pub fn affects_names(self) -> bool {
        matches!(
            self,
            Variant::RoomMember
                | Variant::MemberJoin
                | Variant::DisplayNameChanged
                | Variant::ProfileChanged
                | Variant::MemberInvite
                | Variant::InviteRepeated
                | Variant::MemberLeave
                | Variant::LeaveRepeated
                | Variant::Unban
                | Variant::Uninvite
                | Variant::Kicked
                | Variant::MemberBan
                | Variant::KickBan
        )
    }
}

struct Parts<'a> {
    event: &'a Event,
    room: &'a dyn RoomContext,
    ctx: &'a RenderContext,
}

impl Parts<'_> {
    fn field(&self, path: &'static str) -> Result<&str, RenderError> {
        self.event
            .str_at(path)
            .ok_or(RenderError::MissingField(path))
    }

    fn timestamp(&self) -> Result<String, RenderError> {
        let millis = self
            .event
            .origin_ts()
            .ok_or(RenderError::MissingField("origin_server_ts"))?;
        format_timestamp(millis, self.ctx)
    }

    fn name_of(&self, user_id: &str) -> String {
        match self.room.member_name(user_id) {
            Some(name) => name,
            None => {
                debug!(
                    target = "client::render",
                    room = %self.room.room_id(),
                    user_id,
                    "no display name; using user id"
                );
                user_id.to_string()
            }
        }
    }

    fn target(&self) -> Result<String, RenderError> {
        let user_id = self.field("state_key")?;
        Ok(self.name_of(user_id))
    }

    /// `TS<sep>Sender<rest>`
    fn with_sender(&self, separator: &str, rest: String) -> Result<Vec<Fragment>, RenderError> {
        let sender = self.name_of(self.field("sender")?);
        Ok(vec![
            Fragment::new(format!("{}{separator}", self.timestamp()?), Tone::Dimmed),
            Fragment::new(sender, Tone::Emphasized),
            Fragment::new(rest, Tone::Normal),
        ])
    }

    fn narrate(&self, body: Vec<Fragment>) -> Result<Vec<Fragment>, RenderError> {
        let mut fragments = vec![Fragment::new(
            format!("{} - ", self.timestamp()?),
            Tone::Dimmed,
        )];
        fragments.extend(body);
        Ok(fragments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::RoomState;
    use serde_json::{Value, json};
    use time::{Date, Month, UtcOffset};

    // 2023-11-14T22:13:20Z
    const TS: i64 = 1_700_000_000_000;

    fn ctx() -> RenderContext {
        let today = Date::from_calendar_date(2023, Month::November, 14).unwrap();
        RenderContext::fixed(200, UtcOffset::UTC, today)
    }

    fn room() -> RoomState {
        RoomState::new("!r:example.org")
            .with_member("@ann:example.org", Some("Ann"))
            .with_member("@bob:example.org", Some("Bob"))
    }

    fn member_event(content: Value, prev: Option<Value>, sender: &str, target: &str) -> Event {
        let mut value = json!({
            "event_id": "$m",
            "type": "m.room.member",
            "sender": sender,
            "state_key": target,
            "origin_server_ts": TS,
            "content": content,
        });
        if let Some(prev) = prev {
            value["unsigned"] = json!({ "prev_content": prev });
        }
        Event::from_value(value).unwrap()
    }

    fn classify(event: &Event) -> Variant {
        *standard_tree().select(event).unwrap().value()
    }

    fn rendered(event: &Event) -> String {
        classify(event)
            .render(event, &room(), &ctx())
            .unwrap()
            .iter()
            .map(|fragment| fragment.text.as_str())
            .collect()
    }

    #[test_timeout::timeout]
    fn display_name_change_selects_most_specific_rule() {
        let event = member_event(
            json!({ "membership": "join", "displayname": "Bob" }),
            Some(json!({ "membership": "join", "displayname": "Robert" })),
            "@bob:example.org",
            "@bob:example.org",
        );
        assert_eq!(classify(&event), Variant::DisplayNameChanged);
        assert_eq!(
            rendered(&event),
            "22:13:20 - Robert changed their display name to Bob."
        );
    }

    #[test_timeout::timeout]
    fn same_name_rejoin_is_a_profile_change() {
        let event = member_event(
            json!({ "membership": "join", "displayname": "Bob", "avatar_url": "mxc://b" }),
            Some(json!({ "membership": "join", "displayname": "Bob" })),
            "@bob:example.org",
            "@bob:example.org",
        );
        assert_eq!(classify(&event), Variant::ProfileChanged);
        assert_eq!(rendered(&event), "22:13:20 - Bob changed their avatar.");
    }

    #[test_timeout::timeout]
    fn leave_variants_depend_on_previous_membership() {
        let kick = member_event(
            json!({ "membership": "leave" }),
            Some(json!({ "membership": "join" })),
            "@ann:example.org",
            "@bob:example.org",
        );
        assert_eq!(classify(&kick), Variant::Kicked);
        assert_eq!(rendered(&kick), "22:13:20 - Ann kicked Bob.");

        let left = member_event(
            json!({ "membership": "leave" }),
            Some(json!({ "membership": "join" })),
            "@bob:example.org",
            "@bob:example.org",
        );
        assert_eq!(classify(&left), Variant::MemberLeave);
        assert_eq!(rendered(&left), "22:13:20 - Bob left the room.");

        let repeated = member_event(
            json!({ "membership": "leave" }),
            Some(json!({ "membership": "leave" })),
            "@bob:example.org",
            "@bob:example.org",
        );
        assert_eq!(classify(&repeated), Variant::LeaveRepeated);
        assert!(rendered(&repeated).is_empty());

        let unban = member_event(
            json!({ "membership": "leave" }),
            Some(json!({ "membership": "ban" })),
            "@ann:example.org",
            "@bob:example.org",
        );
        assert_eq!(rendered(&unban), "22:13:20 - Ann unbanned Bob.");
    }

    #[test_timeout::timeout]
    fn unknown_member_falls_back_to_user_id() {
        let event = member_event(
            json!({ "membership": "invite" }),
            None,
            "@ann:example.org",
            "@carol:example.org",
        );
        assert_eq!(
            rendered(&event),
            "22:13:20 - Ann invited @carol:example.org to the room."
        );
    }

    #[test_timeout::timeout]
    fn messages_render_by_msgtype() {
        let message = |msgtype: &str| {
            Event::from_value(json!({
                "event_id": "$t",
                "type": "m.room.message",
                "sender": "@ann:example.org",
                "origin_server_ts": TS,
                "content": { "msgtype": msgtype, "body": "waves" }
            }))
            .unwrap()
        };
        assert_eq!(rendered(&message("m.text")), "22:13:20 - Ann: waves");
        assert_eq!(rendered(&message("m.emote")), "22:13:20 * Ann waves");
        assert_eq!(classify(&message("m.notice")), Variant::NoticeMessage);
        assert_eq!(classify(&message("m.image")), Variant::RoomMessage);
        assert_eq!(rendered(&message("m.image")), "22:13:20 - Ann: waves");
    }

    #[test_timeout::timeout]
    fn redacted_events_win_over_their_type() {
        let event = Event::from_value(json!({
            "event_id": "$t",
            "type": "m.room.message",
            "sender": "@ann:example.org",
            "origin_server_ts": TS,
            "content": {},
            "unsigned": { "redacted_because": { "event_id": "$why" } }
        }))
        .unwrap();
        assert_eq!(classify(&event), Variant::Redacted);
        assert_eq!(rendered(&event), "22:13:20 - Ann: [REDACTED BY EVENT $why]");
    }

    #[test_timeout::timeout]
    fn power_levels_and_aliases_are_suppressed() {
        let power = Event::from_value(json!({
            "event_id": "$p",
            "type": "m.room.power_levels",
            "sender": "@ann:example.org",
            "state_key": "",
            "origin_server_ts": TS,
            "content": { "users": {} }
        }))
        .unwrap();
        assert_eq!(classify(&power), Variant::PowerLevels);
        assert!(rendered(&power).is_empty());
    }

    #[test_timeout::timeout]
    fn unsupported_join_rule_falls_back_to_state_event() {
        let event = Event::from_value(json!({
            "event_id": "$j",
            "type": "m.room.join_rules",
            "sender": "@ann:example.org",
            "state_key": "",
            "origin_server_ts": TS,
            "content": { "join_rule": "restricted" }
        }))
        .unwrap();
        assert_eq!(classify(&event), Variant::StateEvent);
        assert!(rendered(&event).starts_with("Received unknown or mangled event"));
    }

    #[test_timeout::timeout]
    fn local_output_uses_command_rules() {
        let event = crate::event::local::command_error("join", "no such room");
        assert_eq!(classify(&event), Variant::CommandError);
        let fragments = Variant::CommandError
            .render(&event, &room(), &ctx())
            .unwrap();
        assert_eq!(fragments[0].text, "join: ");
        assert_eq!(fragments[1].tone, Tone::Alert);
    }

    #[test_timeout::timeout]
    fn missing_field_is_reported() {
        let event = Event::from_value(json!({
            "event_id": "$x",
            "type": "m.room.message",
            "content": { "body": "hi", "msgtype": "m.text" }
        }))
        .unwrap();
        let err = Variant::TextMessage
            .render(&event, &room(), &ctx())
            .unwrap_err();
        assert_eq!(err, RenderError::MissingField("sender"));
    }
}
