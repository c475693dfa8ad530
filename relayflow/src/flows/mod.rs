//! Flows turning analytics messages into destination actions.
//!
//! Each message kind maps to the actions of every destination that accepts
//! it. A destination is skipped when the message's integrations switch for
//! it is set to anything but `true`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::action::Action;
use crate::core::{self as messages, Common, Integrations};
use crate::destinations::amplitude::{self, Identification, UserMap};
use crate::destinations::{mailchimp, segment};
use crate::utils::generate_insert_id;

/// Actions produced by a flow, keyed by destination name.
pub type Actions = HashMap<String, Vec<Arc<dyn Action>>>;

/// Integration switch and destination name of Amplitude.
const AMPLITUDE: (&str, &str) = ("Amplitude", "amplitude");
/// Integration switch and destination name of Mailchimp.
const MAILCHIMP: (&str, &str) = ("Mailchimp", "mailchimp");
/// Integration switch and destination name of Segment.
const SEGMENT: (&str, &str) = ("Segment", "segment");

/// Transforms a source message into destination actions.
pub trait Flow {
    /// Flow name.
    fn name(&self) -> &'static str;

    /// Returns false to skip the flow entirely.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Builds the actions of every enabled destination.
    fn transform(&self) -> Actions;
}

/// Collects actions while honoring integration switches.
struct ActionsBuilder<'a> {
    integrations: &'a Integrations,
    actions: Actions,
}

impl<'a> ActionsBuilder<'a> {
    fn new(integrations: &'a Integrations) -> Self {
        Self {
            integrations,
            actions: Actions::new(),
        }
    }

    fn add<F>(&mut self, (switch, destination): (&str, &str), build: F) -> &mut Self
    where
        F: FnOnce() -> Vec<Arc<dyn Action>>,
    {
        if self.integrations.is_enabled(switch) {
            self.actions.insert(destination.to_string(), build());
        }
        self
    }

    fn build(&mut self) -> Actions {
        std::mem::take(&mut self.actions)
    }
}

/// An Amplitude event carrying the message's user, time and context.
fn amplitude_event(name: &str, common: &Common) -> amplitude::Event {
    amplitude::Event::from_context(name, common.user_id.clone(), &common.context, common.timestamp)
}

fn single<A: Action + 'static>(action: A) -> Vec<Arc<dyn Action>> {
    vec![Arc::new(action)]
}

fn insert_id(common: &Common) -> String {
    if common.message_id.is_empty() {
        generate_insert_id()
    } else {
        common.message_id.clone()
    }
}

impl Flow for messages::Identify {
    fn name(&self) -> &'static str {
        "identify"
    }

    fn transform(&self) -> Actions {
        let common = &self.common;
        ActionsBuilder::new(&common.integrations)
            .add(AMPLITUDE, || {
                let mut event = amplitude_event("", common);
                event.traits = self.traits.clone();
                single(amplitude::Identify::new(vec![event]))
            })
            .add(MAILCHIMP, || {
                let location = &common.context.location;
                let signup = mailchimp::Signup {
                    email: self.traits.string("email"),
                    first_name: self.traits.string("firstName"),
                    last_name: self.traits.string("lastName"),
                    ip_signup: common.context.ip.clone(),
                    timestamp_signup: common.timestamp,
                    location: Some(mailchimp::SignupLocation {
                        latitude: location.latitude,
                        longitude: location.longitude,
                    }),
                    ..mailchimp::Signup::default()
                };
                single(mailchimp::Identify::new(signup))
            })
            .add(SEGMENT, || single(segment::Identify::new(self.clone())))
            .build()
    }
}

impl Flow for messages::Track {
    fn name(&self) -> &'static str {
        "track"
    }

    fn transform(&self) -> Actions {
        let common = &self.common;
        ActionsBuilder::new(&common.integrations)
            .add(AMPLITUDE, || {
                let properties = &self.properties;
                let mut event = amplitude_event(&self.event, common);
                event.product_id = properties.string("productId");
                event.quantity = properties.number("quantity");
                event.price = properties.number("price");
                event.revenue = properties.number("revenue");
                single(amplitude::Track::new(vec![event]))
            })
            .add(SEGMENT, || single(segment::Track::new(self.clone())))
            .build()
    }
}

impl Flow for messages::Group {
    fn name(&self) -> &'static str {
        "group"
    }

    fn transform(&self) -> Actions {
        let common = &self.common;
        ActionsBuilder::new(&common.integrations)
            .add(AMPLITUDE, || {
                let identification = Identification {
                    user_id: common.user_id.clone(),
                    group_type: self.traits.string("industry"),
                    group_value: self.group_id.clone(),
                    group_properties: self.traits.clone(),
                };
                single(amplitude::Group::new(vec![identification]))
            })
            .add(SEGMENT, || single(segment::Group::new(self.clone())))
            .build()
    }
}

impl Flow for messages::Page {
    fn name(&self) -> &'static str {
        "page"
    }

    fn transform(&self) -> Actions {
        let common = &self.common;
        ActionsBuilder::new(&common.integrations)
            .add(AMPLITUDE, || {
                let page = amplitude::Page::new(vec![amplitude_event(&self.name, common)])
                    .with_insert_id(insert_id(common));
                single(page)
            })
            .add(SEGMENT, || single(segment::Page::new(self.clone())))
            .build()
    }
}

impl Flow for messages::Screen {
    fn name(&self) -> &'static str {
        "screen"
    }

    fn transform(&self) -> Actions {
        let common = &self.common;
        ActionsBuilder::new(&common.integrations)
            .add(AMPLITUDE, || {
                let screen = amplitude::Screen::new(vec![amplitude_event(&self.name, common)])
                    .with_insert_id(insert_id(common));
                single(screen)
            })
            .add(SEGMENT, || single(segment::Screen::new(self.clone())))
            .build()
    }
}

impl Flow for messages::Alias {
    fn name(&self) -> &'static str {
        "alias"
    }

    fn transform(&self) -> Actions {
        ActionsBuilder::new(&self.common.integrations)
            .add(AMPLITUDE, || {
                let mapping = UserMap {
                    user_id: self.previous_id.clone(),
                    global_user_id: self.common.user_id.clone(),
                };
                single(amplitude::Alias::new(vec![mapping]))
            })
            .add(SEGMENT, || single(segment::Alias::new(self.clone())))
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::core::{Context, LocationInfo, Properties};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn payload(actions: &Actions, destination: &str) -> Value {
        let job = actions[destination][0].marshal().unwrap();
        codec::decode(&job).unwrap()
    }

    fn sorted_keys(actions: &Actions) -> Vec<&str> {
        let mut keys: Vec<&str> = actions.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    fn common() -> Common {
        let context = Context {
            ip: "192.0.2.7".to_string(),
            location: LocationInfo {
                latitude: 48.85,
                longitude: 2.35,
                ..LocationInfo::default()
            },
            ..Context::default()
        };
        Common::for_user("u1")
            .with_context(context)
            .with_timestamp(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
    }

    #[test]
    fn test_identify_fans_out() {
        let identify = messages::Identify {
            common: common(),
            traits: Properties::new()
                .with("email", "Jane@Example.com")
                .with("firstName", "Jane")
                .with("lastName", 7),
        };
        let actions = identify.transform();
        assert_eq!(sorted_keys(&actions), vec!["amplitude", "mailchimp", "segment"]);

        let amplitude = payload(&actions, "amplitude");
        assert_eq!(amplitude["events"][0]["user_id"], "u1");
        assert_eq!(amplitude["events"][0]["time"], 1_709_294_400);
        assert_eq!(amplitude["events"][0]["user_properties"]["firstName"], "Jane");

        let mailchimp = payload(&actions, "mailchimp");
        assert_eq!(mailchimp["email_address"], "jane@example.com");
        assert_eq!(mailchimp["first_name"], "Jane");
        assert!(mailchimp.get("last_name").is_none());
        assert_eq!(mailchimp["ip_signup"], "192.0.2.7");
        assert_eq!(mailchimp["location"], json!({"latitude": 48.85, "longitude": 2.35}));

        assert_eq!(payload(&actions, "segment")["userId"], "u1");
    }

    #[test]
    fn test_disabled_integrations_are_skipped() {
        let mut group = messages::Group {
            common: common(),
            group_id: "acme".to_string(),
            traits: Properties::new().with("industry", "retail"),
        };
        group.common.integrations = Integrations::default().with("Segment", false);

        let actions = group.transform();
        assert_eq!(sorted_keys(&actions), vec!["amplitude"]);
        let identification = &payload(&actions, "amplitude")["identification"][0];
        assert_eq!(identification["group_type"], "retail");
        assert_eq!(identification["group_value"], "acme");

        group.common.integrations = serde_json::from_value(json!({"Amplitude": "yes"})).unwrap();
        assert_eq!(sorted_keys(&group.transform()), vec!["segment"]);
    }

    #[test]
    fn test_track_revenue_fields() {
        let track = messages::Track {
            common: common(),
            event: "Order completed".to_string(),
            properties: Properties::new()
                .with("productId", "sku-1")
                .with("quantity", 2)
                .with("price", 9.5)
                .with("revenue", "19"),
        };
        let actions = track.transform();
        let event = &payload(&actions, "amplitude")["events"][0];
        assert_eq!(event["event_type"], "Order completed");
        assert_eq!(event["productId"], "sku-1");
        assert_eq!(event["quantity"], 2.0);
        assert_eq!(event["price"], 9.5);
        assert!(event.get("revenue").is_none());
    }

    #[test]
    fn test_page_insert_id_is_stable() {
        let mut page = messages::Page {
            common: common(),
            name: "Pricing".to_string(),
            properties: Properties::new(),
        };
        page.common.message_id = "msg-1".to_string();

        let first = payload(&page.transform(), "amplitude");
        let second = payload(&page.transform(), "amplitude");
        assert_eq!(first["events"][0]["insert_id"], "msg-1");
        assert_eq!(first["events"][0]["event_type"], "Viewed page 'Pricing'");
        assert_eq!(first, second);
    }

    #[test]
    fn test_alias_mapping() {
        let alias = messages::Alias {
            common: Common::for_user("u2"),
            previous_id: "anon-9".to_string(),
        };
        let actions = alias.transform();
        let mapping = &payload(&actions, "amplitude")["mapping"][0];
        assert_eq!(mapping["user_id"], "anon-9");
        assert_eq!(mapping["global_user_id"], "u2");
        assert_eq!(alias.name(), "alias");
        assert!(alias.is_enabled());
    }
}
