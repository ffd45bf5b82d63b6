mod aggregate_test;
mod crud_test;
mod index_test;
mod negative_test;
mod pagination_test;

use docrepo::model::BaseFields;
use docrepo_derive::Model;
use fake::faker::address::en::CityName;
use fake::faker::name::en::{FirstName, LastName};
use fake::Fake;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Model)]
#[model(index(keys = "email:1", unique))]
#[model(index(keys = "age:-1,name:1", name = "age_name"))]
pub struct User {
    #[serde(flatten)]
    #[model(base)]
    pub base: BaseFields,
    pub name: String,
    pub email: String,
    pub age: i32,
    pub city: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Model)]
#[model(index(keys = "customer:1,createdAt:-1"))]
pub struct Order {
    #[serde(flatten)]
    #[model(base)]
    pub base: BaseFields,
    pub customer: String,
    pub amount: i64,
    pub status: String,
}

/// A document type without hooks or indexes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Model)]
pub struct Note {
    pub text: String,
}

pub fn generate_user() -> User {
    let first: String = FirstName().fake();
    let last: String = LastName().fake();
    User {
        base: BaseFields::new(),
        name: format!("{} {}", first, last),
        email: format!("{}.{}@example.com", first.to_lowercase(), uuid::Uuid::new_v4().simple()),
        age: (18..80).fake::<i32>(),
        city: CityName().fake(),
        tags: vec![],
    }
}

pub fn user_aged(name: &str, age: i32) -> User {
    User {
        name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase()),
        age,
        ..generate_user()
    }
}

pub fn order(customer: &str, amount: i64, status: &str) -> Order {
    Order {
        base: BaseFields::new(),
        customer: customer.to_string(),
        amount,
        status: status.to_string(),
    }
}
