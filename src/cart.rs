// src/cart.rs

use chrono::{DateTime, Utc};

use crate::{
    errors::AppError,
    models::{CartDetailsResponse, CartItem, CartSummary, Product},
};

/// Darmowa wysyłka dopiero POWYŻEJ tej kwoty (porównanie ostre).
pub const FREE_SHIPPING_THRESHOLD: i64 = 2500;
pub const SHIPPING_FEE: i64 = 599;
/// Podatek w punktach bazowych (8%).
pub const TAX_RATE_BPS: i64 = 800;
/// Górna granica ilości w jednej linii koszyka.
pub const MAX_LINE_QUANTITY: u32 = 99;

pub fn format_price(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.abs();
    format!("{}${}.{:02}", sign, abs / 100, abs % 100)
}

pub fn shipping_for(subtotal: i64) -> i64 {
    if subtotal <= 0 || subtotal > FREE_SHIPPING_THRESHOLD {
        0
    } else {
        SHIPPING_FEE
    }
}

/// Podatek zaokrąglany "half-up" do pełnego centa.
pub fn tax_for(subtotal: i64) -> i64 {
    if subtotal <= 0 {
        return 0;
    }
    subtotal.saturating_mul(TAX_RATE_BPS).saturating_add(5_000) / 10_000
}

/// Koszyk sesji. Linie są tylko dopisywane - ten sam wariant dodany
/// dwa razy daje dwie osobne linie.
#[derive(Debug, Clone, Default)]
pub struct Cart {
    items: Vec<CartItem>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn add_item(
        &mut self,
        product: &Product,
        size: &str,
        color: &str,
        quantity: u32,
    ) -> Result<&CartItem, AppError> {
        self.add_item_at(product, size, color, quantity, Utc::now())
    }

    pub fn add_item_at(
        &mut self,
        product: &Product,
        size: &str,
        color: &str,
        quantity: u32,
        added_at: DateTime<Utc>,
    ) -> Result<&CartItem, AppError> {
        if !product.in_stock {
            tracing::warn!("Próba dodania niedostępnego produktu {} do koszyka", product.id);
            return Err(AppError::UnprocessableEntity(format!(
                "{} is out of stock",
                product.name
            )));
        }
        if quantity < 1 {
            return Err(AppError::UnprocessableEntity(
                "Quantity must be at least 1".to_string(),
            ));
        }
        if quantity > MAX_LINE_QUANTITY {
            return Err(quantity_too_large());
        }
        if !product.sizes.iter().any(|s| s == size) {
            return Err(AppError::UnprocessableEntity(format!(
                "Size '{}' is not available for {}",
                size, product.name
            )));
        }
        if !product.colors.iter().any(|c| c == color) {
            return Err(AppError::UnprocessableEntity(format!(
                "Color '{}' is not available for {}",
                color, product.name
            )));
        }

        // Identyfikator linii: produkt + wariant + moment dodania
        let mut stamp = added_at.timestamp_millis();
        let mut line_id = format!("{}-{}-{}-{}", product.id, size, color, stamp);
        while self.items.iter().any(|item| item.line_id == line_id) {
            stamp += 1;
            line_id = format!("{}-{}-{}-{}", product.id, size, color, stamp);
        }

        tracing::debug!("Dodano linię {} ({} szt.) do koszyka", line_id, quantity);
        self.items.push(CartItem {
            line_id,
            product_id: product.id,
            name: product.name.clone(),
            price: product.price,
            image: product.image.clone(),
            selected_size: size.to_string(),
            selected_color: color.to_string(),
            quantity,
            added_at,
        });

        self.items
            .last()
            .ok_or_else(|| AppError::InternalServerError("Koszyk pusty po dodaniu".to_string()))
    }

    /// Ustawia ilość. Zero (lub mniej) usuwa linię - zwracamy wtedy `None`.
    pub fn update_quantity(
        &mut self,
        line_id: &str,
        quantity: i64,
    ) -> Result<Option<&CartItem>, AppError> {
        let position = self
            .items
            .iter()
            .position(|item| item.line_id == line_id)
            .ok_or(AppError::NotFound)?;

        if quantity <= 0 {
            self.items.remove(position);
            tracing::debug!("Ilość 0 - usunięto linię {}", line_id);
            return Ok(None);
        }

        let quantity = u32::try_from(quantity)
            .ok()
            .filter(|q| *q <= MAX_LINE_QUANTITY)
            .ok_or_else(quantity_too_large)?;
        let item = self
            .items
            .get_mut(position)
            .ok_or(AppError::NotFound)?;
        item.quantity = quantity;
        Ok(Some(&*item))
    }

    pub fn remove_item(&mut self, line_id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.line_id != line_id);
        before != self.items.len()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn subtotal(&self) -> i64 {
        self.items
            .iter()
            .map(CartItem::line_total)
            .fold(0, i64::saturating_add)
    }

    pub fn total_items(&self) -> u32 {
        self.items
            .iter()
            .map(|item| item.quantity)
            .fold(0, u32::saturating_add)
    }

    pub fn summary(&self) -> CartSummary {
        let subtotal = self.subtotal();
        let shipping = shipping_for(subtotal);
        let tax = tax_for(subtotal);
        CartSummary {
            total_items: self.total_items(),
            subtotal,
            shipping,
            tax,
            total: subtotal.saturating_add(shipping).saturating_add(tax),
        }
    }

    pub fn details(&self) -> CartDetailsResponse {
        CartDetailsResponse {
            items: self.items.clone(),
            summary: self.summary(),
        }
    }
}

fn quantity_too_large() -> AppError {
    AppError::UnprocessableEntity(format!("Quantity cannot exceed {}", MAX_LINE_QUANTITY))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::find_product;
    use chrono::TimeZone;
    use rand::Rng;

    fn tshirt() -> &'static Product {
        find_product(1).expect("koszulka w katalogu")
    }

    #[test]
    fn test_checkout_totals_for_two_shirts() {
        let mut cart = Cart::new();
        cart.add_item(tshirt(), "M", "Black", 2).unwrap();
        let summary = cart.summary();
        assert_eq!(summary.subtotal, 5998);
        assert_eq!(summary.shipping, 0);
        assert_eq!(summary.tax, 480);
        assert_eq!(summary.total, 6478);
        assert_eq!(format_price(summary.total), "$64.78");
    }

    #[test]
    fn test_shipping_threshold_is_strict() {
        assert_eq!(shipping_for(FREE_SHIPPING_THRESHOLD), SHIPPING_FEE);
        assert_eq!(shipping_for(FREE_SHIPPING_THRESHOLD + 1), 0);
        assert_eq!(shipping_for(2499), SHIPPING_FEE);
        assert_eq!(shipping_for(0), 0);
    }

    #[test]
    fn test_single_shirt_ships_free() {
        let mut cart = Cart::new();
        cart.add_item(tshirt(), "L", "Navy", 1).unwrap();
        let summary = cart.summary();
        assert_eq!(summary.shipping, 0);
        assert_eq!(summary.tax, 240);
        assert_eq!(summary.total, 2999 + 240);
    }

    #[test]
    fn test_tax_rounds_half_up() {
        // 8% z 0,06$ = 0,48 centa -> 0; 8% z 0,07$ = 0,56 centa -> 1
        assert_eq!(tax_for(6), 0);
        assert_eq!(tax_for(7), 1);
        assert_eq!(tax_for(5998), 480);
    }

    #[test]
    fn test_same_variant_creates_new_line() {
        let mut cart = Cart::new();
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let first = cart.add_item_at(tshirt(), "M", "Black", 1, at).unwrap().line_id.clone();
        let second = cart.add_item_at(tshirt(), "M", "Black", 1, at).unwrap().line_id.clone();
        assert_eq!(cart.items().len(), 2);
        assert_ne!(first, second);
        assert_eq!(first, format!("1-M-Black-{}", at.timestamp_millis()));
    }

    #[test]
    fn test_update_to_zero_equals_removal() {
        let mut cart = Cart::new();
        let line = cart.add_item(tshirt(), "S", "Navy", 3).unwrap().line_id.clone();
        let updated = cart.update_quantity(&line, 5).unwrap().map(|i| i.quantity);
        assert_eq!(updated, Some(5));
        assert!(cart.update_quantity(&line, 0).unwrap().is_none());
        assert!(cart.is_empty());
        assert!(matches!(cart.update_quantity(&line, 1), Err(AppError::NotFound)));
    }

    #[test]
    fn test_remove_unknown_line_is_noop() {
        let mut cart = Cart::new();
        cart.add_item(tshirt(), "S", "Navy", 1).unwrap();
        assert!(!cart.remove_item("nope"));
        assert_eq!(cart.items().len(), 1);
    }

    #[test]
    fn test_rejects_invalid_variants() {
        let mut cart = Cart::new();
        assert!(cart.add_item(tshirt(), "XS", "Black", 1).is_err());
        assert!(cart.add_item(tshirt(), "M", "Pink", 1).is_err());
        assert!(cart.add_item(tshirt(), "M", "Black", 0).is_err());

        let mut sold_out = tshirt().clone();
        sold_out.in_stock = false;
        assert!(cart.add_item(&sold_out, "M", "Black", 1).is_err());
        assert!(cart.is_empty());
    }

    #[test]
    fn test_quantity_is_capped_per_line() {
        let mut cart = Cart::new();
        assert!(matches!(
            cart.add_item(tshirt(), "M", "Black", MAX_LINE_QUANTITY + 1),
            Err(AppError::UnprocessableEntity(_))
        ));
        assert!(matches!(
            cart.add_item(tshirt(), "M", "Black", u32::MAX),
            Err(AppError::UnprocessableEntity(_))
        ));
        assert!(cart.is_empty());

        let line = cart
            .add_item(tshirt(), "M", "Black", MAX_LINE_QUANTITY)
            .unwrap()
            .line_id
            .clone();
        assert!(matches!(
            cart.update_quantity(&line, 1_000),
            Err(AppError::UnprocessableEntity(_))
        ));
        assert!(matches!(
            cart.update_quantity(&line, i64::MAX),
            Err(AppError::UnprocessableEntity(_))
        ));
        assert_eq!(cart.items()[0].quantity, MAX_LINE_QUANTITY);

        let summary = cart.summary();
        assert_eq!(summary.total_items, 99);
        assert_eq!(summary.subtotal, 2999 * 99);
        assert_eq!(summary.tax, tax_for(2999 * 99));
    }

    #[test]
    fn test_tax_saturates_instead_of_overflowing() {
        assert_eq!(tax_for(i64::MAX), i64::MAX / 10_000);
    }

    #[test]
    fn test_total_matches_fold_for_random_operations() {
        let mut rng = rand::rng();
        let mut cart = Cart::new();
        let sizes = &tshirt().sizes;
        for _ in 0..300 {
            match rng.random_range(0..3) {
                0 => {
                    let size = &sizes[rng.random_range(0..sizes.len())];
                    let qty = rng.random_range(1..5);
                    cart.add_item(tshirt(), size, "Black", qty).unwrap();
                }
                1 if !cart.is_empty() => {
                    let idx = rng.random_range(0..cart.items().len());
                    let line = cart.items()[idx].line_id.clone();
                    let qty = rng.random_range(-1..6);
                    cart.update_quantity(&line, qty).unwrap();
                }
                2 if !cart.is_empty() => {
                    let idx = rng.random_range(0..cart.items().len());
                    let line = cart.items()[idx].line_id.clone();
                    assert!(cart.remove_item(&line));
                }
                _ => {}
            }

            let fold: i64 = cart
                .items()
                .iter()
                .map(|i| i.price * i64::from(i.quantity))
                .sum();
            let summary = cart.summary();
            assert!(cart.items().iter().all(|i| i.quantity >= 1));
            assert_eq!(summary.subtotal, fold);
            assert_eq!(summary.total, fold + shipping_for(fold) + tax_for(fold));
        }
    }
}
