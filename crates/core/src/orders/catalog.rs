use std::collections::BTreeMap;

use thiserror::Error;

use crate::domain::client::ClientId;
use crate::domain::order::{OrderDraft, OrderItem};
use crate::domain::product::{Product, ProductId};
use crate::errors::DomainError;

/// Snapshot of the product list taken for one turn.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    products: Vec<Product>,
}

/// Outcome of resolving requested `(id, quantity)` pairs against the catalog.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedItems {
    pub items: Vec<OrderItem>,
    pub unresolved: Vec<ProductId>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum QuantityError {
    #[error("product {product_id} has a non-positive quantity")]
    NotPositive { product_id: ProductId, quantity: i64 },
    #[error("quantity {quantity} for product {product_id} exceeds {max}", max = u32::MAX)]
    OutOfRange { product_id: ProductId, quantity: i64 },
}

impl Catalog {
    pub fn new(products: Vec<Product>) -> Self {
        Self { products }
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn products(&self) -> &[Product] {
        &self.products
    }

    pub fn find(&self, product_id: &ProductId) -> Option<&Product> {
        self.products.iter().find(|product| &product.id == product_id)
    }

    /// Products grouped by type; groups and the products inside them are
    /// sorted by name.
    pub fn grouped_by_type(&self) -> BTreeMap<&str, Vec<&Product>> {
        let mut groups: BTreeMap<&str, Vec<&Product>> = BTreeMap::new();
        for product in &self.products {
            groups.entry(product.product_type.trim()).or_default().push(product);
        }
        for products in groups.values_mut() {
            products.sort_by(|left, right| left.name.cmp(&right.name));
        }
        groups
    }

    /// Captures the current price of each requested product. Ids that are not
    /// in the catalog are reported, never dropped.
    pub fn resolve(&self, requested: &[(ProductId, i64)]) -> Result<ResolvedItems, QuantityError> {
        let mut items = Vec::with_capacity(requested.len());
        let mut unresolved = Vec::new();

        for &(product_id, requested_quantity) in requested {
            if requested_quantity <= 0 {
                return Err(QuantityError::NotPositive { product_id, quantity: requested_quantity });
            }
            let quantity = u32::try_from(requested_quantity).map_err(|_| {
                QuantityError::OutOfRange { product_id, quantity: requested_quantity }
            })?;

            match self.find(&product_id) {
                Some(product) => items.push(OrderItem {
                    product_id: product.id,
                    price_per_unit: product.sell_price_client,
                    quantity,
                }),
                None => unresolved.push(product_id),
            }
        }

        Ok(ResolvedItems { items, unresolved })
    }

    pub fn product_name(&self, product_id: &ProductId) -> String {
        self.find(product_id)
            .map(|product| product.name.clone())
            .unwrap_or_else(|| format!("product #{product_id}"))
    }
}

impl ResolvedItems {
    pub fn into_draft(self, client_id: ClientId) -> Result<OrderDraft, DomainError> {
        if !self.unresolved.is_empty() {
            let ids = self.unresolved.iter().map(ToString::to_string).collect::<Vec<_>>();
            return Err(DomainError::InvariantViolation(format!(
                "unknown product ids: {}",
                ids.join(", ")
            )));
        }
        OrderDraft::new(client_id, self.items)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use crate::domain::client::ClientId;
    use crate::domain::product::{Product, ProductId};
    use crate::errors::DomainError;

    use super::{Catalog, QuantityError};

    fn product(id: i64, name: &str, product_type: &str, price: i64) -> Product {
        Product {
            id: ProductId(id),
            name: name.to_string(),
            product_type: product_type.to_string(),
            sell_price_client: Decimal::from(price),
        }
    }

    fn catalog() -> Catalog {
        Catalog::new(vec![
            product(1, "Café", "bebidas", 1000),
            product(2, "Té", "bebidas", 800),
            product(3, "Medialuna", "panadería", 450),
        ])
    }

    #[test]
    fn resolve_captures_current_prices() {
        let resolved =
            catalog().resolve(&[(ProductId(1), 2), (ProductId(2), 1)]).expect("resolves");

        assert!(resolved.unresolved.is_empty());
        assert_eq!(resolved.items[0].price_per_unit, Decimal::from(1000));
        assert_eq!(resolved.items[0].quantity, 2);
        assert_eq!(resolved.items[1].price_per_unit, Decimal::from(800));

        let draft = resolved.into_draft(ClientId(7)).expect("draft");
        assert_eq!(draft.total(), Decimal::from(2800));
    }

    #[test]
    fn unknown_ids_are_reported_and_block_the_draft() {
        let resolved =
            catalog().resolve(&[(ProductId(1), 1), (ProductId(99), 3)]).expect("resolves");
        assert_eq!(resolved.unresolved, vec![ProductId(99)]);

        let error = resolved.into_draft(ClientId(7)).expect_err("must not drop items");
        assert!(matches!(error, DomainError::InvariantViolation(ref message) if message.contains("99")));
    }

    #[test]
    fn non_positive_quantities_are_rejected() {
        assert_eq!(
            catalog().resolve(&[(ProductId(1), 0)]),
            Err(QuantityError::NotPositive { product_id: ProductId(1), quantity: 0 })
        );
        assert!(matches!(
            catalog().resolve(&[(ProductId(1), -2)]),
            Err(QuantityError::NotPositive { .. })
        ));
    }

    #[test]
    fn quantities_beyond_u32_are_out_of_range() {
        let too_many = i64::from(u32::MAX) + 1;
        let error = catalog().resolve(&[(ProductId(2), too_many)]).expect_err("out of range");
        assert_eq!(error, QuantityError::OutOfRange { product_id: ProductId(2), quantity: too_many });
        assert!(error.to_string().contains("4294967295"));

        let largest = catalog().resolve(&[(ProductId(2), i64::from(u32::MAX))]).expect("fits");
        assert_eq!(largest.items[0].quantity, u32::MAX);
    }

    #[test]
    fn grouping_sorts_types_and_names() {
        let catalog = catalog();
        let groups = catalog.grouped_by_type();
        let types = groups.keys().copied().collect::<Vec<_>>();
        assert_eq!(types, vec!["bebidas", "panadería"]);

        let drinks = groups["bebidas"].iter().map(|product| product.name.as_str()).collect::<Vec<_>>();
        assert_eq!(drinks, vec!["Café", "Té"]);
    }
}
