//! Operations with richer schemas: optional fields, defaults, lists.

use std::sync::Arc;

use opgroup_core::{FieldDef, FieldKind, InputSchema, OperationInput};
use serde::Deserialize;

use crate::service::{ExecutionContext, NoSettings, OperationMeta, OperationSet, ServiceGroup};

pub const LOCATOR: &str = "opgroup_server::groups::schema:SchemaGroup";

#[derive(Debug, Deserialize)]
pub struct PersonInput {
    pub name: String,
    pub age: u32,
    pub email: Option<String>,
}

impl OperationInput for PersonInput {
    fn input_schema() -> InputSchema {
        InputSchema::new("PersonInput")
            .describe("A person to greet")
            .field(FieldDef::string("name").describe("Person's name"))
            .field(FieldDef::integer("age").minimum(0.0).describe("Person's age"))
            .field(FieldDef::string("email").optional().describe("Person's email address"))
    }
}

#[derive(Debug, Deserialize)]
pub struct MessageInput {
    pub text: String,
    pub repeat: u32,
}

impl OperationInput for MessageInput {
    fn input_schema() -> InputSchema {
        InputSchema::new("MessageInput")
            .field(FieldDef::string("text").describe("Message text"))
            .field(
                FieldDef::integer("repeat")
                    .default_value(1)
                    .minimum(1.0)
                    .maximum(10.0)
                    .describe("Number of times to repeat the message"),
            )
    }
}

#[derive(Debug, Deserialize)]
pub struct ListInput {
    pub items: Vec<String>,
    pub prefix: Option<String>,
    pub uppercase: bool,
}

impl OperationInput for ListInput {
    fn input_schema() -> InputSchema {
        InputSchema::new("ListInput")
            .field(FieldDef::array("items", FieldKind::String).describe("List of items to process"))
            .field(
                FieldDef::string("prefix")
                    .default_value("Item:")
                    .describe("Prefix to add to each item"),
            )
            .field(
                FieldDef::boolean("uppercase")
                    .default_value(false)
                    .describe("Whether to convert items to uppercase"),
            )
    }
}

pub struct SchemaGroup;

impl SchemaGroup {
    fn greet(person: &PersonInput) -> String {
        let mut greeting = format!("Hello, {}! ", person.name);
        if person.age > 0 {
            greeting.push_str(&format!("You are {} years old. ", person.age));
        }
        if let Some(email) = &person.email {
            greeting.push_str(&format!("Your email is {email}."));
        }
        greeting
    }

    fn repeat(message: &MessageInput, ctx: &ExecutionContext) -> String {
        ctx.info(format!("Repeating message {} times", message.repeat));
        let mut parts = Vec::with_capacity(message.repeat as usize);
        for i in 1..=message.repeat {
            ctx.report_progress(f64::from(i), Some(f64::from(message.repeat)));
            parts.push(message.text.as_str());
        }
        parts.join(" ")
    }

    fn process(list: ListInput) -> Vec<String> {
        let prefix = list.prefix.as_deref().unwrap_or_default();
        list.items
            .into_iter()
            .map(|item| {
                let item = if list.uppercase { item.to_uppercase() } else { item };
                if prefix.is_empty() {
                    item
                } else {
                    format!("{prefix} {item}")
                }
            })
            .collect()
    }
}

impl ServiceGroup for SchemaGroup {
    type Settings = NoSettings;

    fn new(_settings: NoSettings) -> anyhow::Result<Self> {
        Ok(Self)
    }

    fn operations(ops: &mut OperationSet<Self>) {
        ops.op(
            OperationMeta::new("greet_person")
                .doc("Greet a person based on their information.")
                .schema_of::<PersonInput>(),
            |_g: Arc<Self>, person: PersonInput| async move { anyhow::Ok(Self::greet(&person)) },
        )
        .op_with_context(
            OperationMeta::new("repeat_message")
                .doc("Repeat a message a number of times, reporting progress.")
                .schema_of::<MessageInput>(),
            |_g: Arc<Self>, message: MessageInput, ctx: ExecutionContext| async move {
                anyhow::Ok(Self::repeat(&message, &ctx))
            },
        )
        .op(
            OperationMeta::new("process_list")
                .doc("Prefix and optionally uppercase every item of a list.")
                .schema_of::<ListInput>(),
            |_g: Arc<Self>, list: ListInput| async move { anyhow::Ok(Self::process(list)) },
        );
    }
}
