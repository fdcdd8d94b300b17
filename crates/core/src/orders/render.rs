//! Fixed-format customer-facing text.

use crate::domain::client::{Client, ClientField};
use crate::domain::conversation::ORDER_CONFIRMATION_MARKER;
use crate::domain::order::{Order, OrderDraft};
use crate::orders::catalog::Catalog;
use crate::orders::pricing::MoneyFormat;

pub const PRICE_LIST_HEADER: &str = "Price list:";
pub const ORDER_LIST_HEADER: &str = "Your orders:";
pub const NO_ORDERS_MESSAGE: &str = "You have no orders yet.";
pub const NO_PENDING_ORDER_MESSAGE: &str = "There is no pending order to confirm.";
pub const ORDER_CANCELLED_MESSAGE: &str = "Your order was cancelled.";
pub const REGISTRATION_REQUIRED_MESSAGE: &str = "You are not registered yet. Send me your name, \
                                                 the name of your business and the delivery \
                                                 address to register.";
pub const PHONE_REQUIRED_MESSAGE: &str =
    "I couldn't read your phone number from this chat, so I can't look up your account.";

pub fn price_list(catalog: &Catalog, money: &MoneyFormat) -> String {
    let mut lines = vec![PRICE_LIST_HEADER.to_string()];
    for (product_type, products) in catalog.grouped_by_type() {
        lines.push(String::new());
        lines.push(format!("*{product_type}*"));
        for product in products {
            lines.push(format!("- {}: {}", product.name, money.format(product.sell_price_client)));
        }
    }
    lines.join("\n")
}

/// Flat chronological list, oldest first.
pub fn order_list(orders: &[Order], catalog: &Catalog, money: &MoneyFormat) -> String {
    if orders.is_empty() {
        return NO_ORDERS_MESSAGE.to_string();
    }

    let mut sorted = orders.iter().collect::<Vec<_>>();
    sorted.sort_by_key(|order| (order.created_at, order.id));

    let mut lines = vec![ORDER_LIST_HEADER.to_string()];
    for order in sorted {
        let items = order
            .items
            .iter()
            .map(|item| format!("{} x {}", item.quantity, catalog.product_name(&item.product_id)))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!(
            "- Order #{} ({}): {} | Total: {}",
            order.id,
            order.created_at.format("%Y-%m-%d"),
            items,
            money.format(order.total())
        ));
    }
    lines.join("\n")
}

/// Itemized proposal ending in [`ORDER_CONFIRMATION_MARKER`].
pub fn draft_summary(draft: &OrderDraft, catalog: &Catalog, money: &MoneyFormat) -> String {
    let mut lines = vec!["Here is your order:".to_string()];
    for item in &draft.items {
        lines.push(format!(
            "- {} x {} @ {} = {}",
            item.quantity,
            catalog.product_name(&item.product_id),
            money.format(item.price_per_unit),
            money.format(item.line_total())
        ));
    }
    lines.push(format!("Total: {}", money.format(draft.total())));
    lines.push(ORDER_CONFIRMATION_MARKER.to_string());
    lines.join("\n")
}

pub fn order_confirmed(order: &Order, money: &MoneyFormat) -> String {
    format!("Order confirmed. Your order number is #{} (total {}).", order.id, money.format(order.total()))
}

pub fn missing_client_fields(missing: &[ClientField]) -> String {
    let labels = missing.iter().map(ClientField::label).collect::<Vec<_>>();
    let joined = match labels.as_slice() {
        [] => String::new(),
        [only] => (*only).to_string(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    };
    format!("To register you I still need {joined}.")
}

pub fn client_registered(client: &Client) -> String {
    format!(
        "Welcome {}! {} is now registered with delivery address {}.",
        client.name, client.local_name, client.address
    )
}

pub fn client_already_registered(client: &Client) -> String {
    format!(
        "You are already registered as {} ({}), delivery address {}.",
        client.name, client.local_name, client.address
    )
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use crate::domain::client::{ClientField, ClientId};
    use crate::domain::conversation::ORDER_CONFIRMATION_MARKER;
    use crate::domain::order::{Order, OrderDraft, OrderId, OrderItem};
    use crate::domain::product::{Product, ProductId};
    use crate::orders::catalog::Catalog;
    use crate::orders::pricing::MoneyFormat;

    use super::{draft_summary, missing_client_fields, order_list, price_list, NO_ORDERS_MESSAGE};

    fn catalog() -> Catalog {
        Catalog::new(vec![
            Product {
                id: ProductId(1),
                name: "café".to_string(),
                product_type: "bebidas".to_string(),
                sell_price_client: Decimal::from(1000),
            },
            Product {
                id: ProductId(2),
                name: "te".to_string(),
                product_type: "bebidas".to_string(),
                sell_price_client: Decimal::from(800),
            },
        ])
    }

    #[test]
    fn empty_catalog_renders_header_only() {
        assert_eq!(price_list(&Catalog::default(), &MoneyFormat::default()), "Price list:");
    }

    #[test]
    fn price_list_groups_by_type() {
        let text = price_list(&catalog(), &MoneyFormat::default());
        assert!(text.contains("*bebidas*"));
        assert!(text.contains("- café: $1000"));
        assert!(text.contains("- te: $800"));
    }

    #[test]
    fn draft_summary_lists_items_total_and_marker() {
        let draft = OrderDraft::new(
            ClientId(1),
            vec![
                OrderItem { product_id: ProductId(1), price_per_unit: Decimal::from(1000), quantity: 2 },
                OrderItem { product_id: ProductId(2), price_per_unit: Decimal::from(800), quantity: 1 },
            ],
        )
        .expect("draft");

        let text = draft_summary(&draft, &catalog(), &MoneyFormat::default());
        assert!(text.contains("- 2 x café @ $1000 = $2000"));
        assert!(text.contains("Total: $2800"));
        assert!(text.ends_with(ORDER_CONFIRMATION_MARKER));
    }

    #[test]
    fn order_list_is_chronological() {
        let order = |id: i64, day: u32| Order {
            id: OrderId(id),
            client_id: ClientId(1),
            items: vec![OrderItem {
                product_id: ProductId(2),
                price_per_unit: Decimal::from(800),
                quantity: 1,
            }],
            created_at: Utc.with_ymd_and_hms(2026, 3, day, 10, 0, 0).single().expect("date"),
        };

        let text = order_list(&[order(9, 5), order(4, 2)], &catalog(), &MoneyFormat::default());
        let first = text.find("#4").expect("order 4 listed");
        let second = text.find("#9").expect("order 9 listed");
        assert!(first < second);

        assert_eq!(order_list(&[], &catalog(), &MoneyFormat::default()), NO_ORDERS_MESSAGE);
    }

    #[test]
    fn missing_fields_prompt_lists_only_missing() {
        assert_eq!(
            missing_client_fields(&[ClientField::Address]),
            "To register you I still need the delivery address."
        );
        assert_eq!(
            missing_client_fields(&[ClientField::Name, ClientField::LocalName, ClientField::Address]),
            "To register you I still need your name, the name of your business and the delivery address."
        );
    }
}
