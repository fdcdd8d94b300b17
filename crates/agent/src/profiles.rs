use pedido_core::Intent;

/// Fixed instruction sets sent to the NLU engine, one per call site.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InstructionProfile {
    IntentClassification,
    OrderItemExtraction,
    ClientFieldExtraction,
}

impl InstructionProfile {
    pub fn name(&self) -> &'static str {
        match self {
            Self::IntentClassification => "intent_classification",
            Self::OrderItemExtraction => "order_item_extraction",
            Self::ClientFieldExtraction => "client_field_extraction",
        }
    }

    pub fn instructions(&self) -> String {
        match self {
            Self::IntentClassification => classification_instructions(),
            Self::OrderItemExtraction => ORDER_ITEM_INSTRUCTIONS.to_string(),
            Self::ClientFieldExtraction => CLIENT_FIELD_INSTRUCTIONS.to_string(),
        }
    }
}

fn classification_instructions() -> String {
    let labels = Intent::ALL.iter().map(Intent::label).collect::<Vec<_>>().join(", ");
    format!(
        "You classify messages sent by customers of a wholesale business.\n\
         Answer with exactly one label from this list and nothing else: {labels}.\n\
         - list_prices: the customer asks for prices, the catalog or what is available.\n\
         - list_orders: the customer asks about orders they already placed.\n\
         - place_order: the customer wants to buy or order products.\n\
         - register_client: the customer wants to register or sends their name, business name or address.\n\
         - confirm_order: the customer confirms a pending order (for example \"confirm\", \"yes\", \"confirmar\").\n\
         - cancel_order: the customer cancels or rejects a pending order.\n\
         - not_related: anything else."
    )
}

const ORDER_ITEM_INSTRUCTIONS: &str = "You extract order lines from a customer message.\n\
The input starts with the catalog, one product per line as `id: name (type)`, followed by the message.\n\
Reply with a JSON object only: {\"status\": \"positive\" | \"medium\" | \"negative\", \"message\": string, \"items\": [{\"id\": number, \"quantity\": number}]}.\n\
- positive: every requested product matches one catalog id; fill `items`.\n\
- medium: the request is ambiguous; explain what is unclear in `message` and leave `items` empty.\n\
- negative: the message does not describe an order for catalog products; explain why in `message`.\n\
Never invent ids that are not in the catalog.";

const CLIENT_FIELD_INSTRUCTIONS: &str = "You extract registration data from a customer message.\n\
Reply with a JSON object only: {\"name\": string | null, \"localName\": string | null, \"address\": string | null}.\n\
`name` is the person's name, `localName` the name of their business and `address` the delivery address.\n\
Use null for anything the message does not state.";

#[cfg(test)]
mod tests {
    use pedido_core::Intent;

    use super::InstructionProfile;

    #[test]
    fn classification_profile_lists_every_label() {
        let instructions = InstructionProfile::IntentClassification.instructions();
        for intent in Intent::ALL {
            assert!(instructions.contains(intent.label()), "missing {}", intent.label());
        }
    }

    #[test]
    fn extraction_profiles_describe_their_json_shape() {
        assert!(InstructionProfile::OrderItemExtraction.instructions().contains("\"items\""));
        assert!(InstructionProfile::ClientFieldExtraction.instructions().contains("localName"));
    }
}
