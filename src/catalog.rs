// src/catalog.rs

use once_cell::sync::Lazy;

use crate::models::Product;

// Katalog jest statyczny - budowany raz, przy pierwszym użyciu
static CATALOG: Lazy<Vec<Product>> = Lazy::new(|| {
    vec![Product {
        id: 1,
        name: "MetaVerse Hub T-Shirt".to_string(),
        price: 2999,
        original_price: Some(3999),
        description: "Premium quality cotton t-shirt with holographic MetaVerse Hub logo. \
                      Perfect for digital pioneers and tech enthusiasts."
            .to_string(),
        image: "/static/tshirt-mockup.svg".to_string(),
        sizes: ["S", "M", "L", "XL", "XXL"].map(String::from).to_vec(),
        colors: ["Black", "Navy", "Cyber Blue"].map(String::from).to_vec(),
        features: [
            "100% Premium Cotton",
            "Holographic Logo Print",
            "Comfortable Fit",
            "Machine Washable",
            "Limited Edition",
        ]
        .map(String::from)
        .to_vec(),
        in_stock: true,
        rating: 4.8,
        reviews: 127,
    }]
});

pub fn all_products() -> &'static [Product] {
    &CATALOG
}

pub fn find_product(product_id: u32) -> Option<&'static Product> {
    CATALOG.iter().find(|p| p.id == product_id)
}
