use std::{collections::HashMap, fmt};

use postbox::serializer::{ProstSerializer, QueueMessage, TypeRegistry};
use prost::Message;
use rand::prelude::*;
use rand_distr::Normal;

use crate::proto::orders::*;

const ORDER_PLACED: &str = "orders.OrderPlaced";
const ORDER_CANCELLED: &str = "orders.OrderCancelled";

const CUSTOMERS: [&str; 4] = ["ada", "grace", "linus", "ken"];
const MEAN_PRICE: f64 = 2500.0;
const STD_DEV: f64 = 800.0;

/// Everything published on the orders stream.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderEvent {
    Placed(OrderPlaced),
    Cancelled(OrderCancelled),
}

impl From<OrderPlaced> for OrderEvent {
    fn from(event: OrderPlaced) -> Self {
        OrderEvent::Placed(event)
    }
}

impl From<OrderCancelled> for OrderEvent {
    fn from(event: OrderCancelled) -> Self {
        OrderEvent::Cancelled(event)
    }
}

impl QueueMessage for OrderEvent {
    fn type_name(&self) -> &'static str {
        match self {
            OrderEvent::Placed(_) => ORDER_PLACED,
            OrderEvent::Cancelled(_) => ORDER_CANCELLED,
        }
    }

    fn encode_payload(&self) -> Vec<u8> {
        match self {
            OrderEvent::Placed(e) => e.encode_to_vec(),
            OrderEvent::Cancelled(e) => e.encode_to_vec(),
        }
    }
}

pub fn orders_serializer() -> ProstSerializer<OrderEvent> {
    ProstSerializer::new(
        TypeRegistry::new()
            .register::<OrderPlaced>(ORDER_PLACED, 1)
            .register::<OrderCancelled>(ORDER_CANCELLED, 1),
    )
}

/// For demonstration purposes, generate a random stream of orders. Roughly
/// one in five events cancels an earlier order.
pub struct OrderGenerator {
    next_id: u64,
    open: Vec<String>,
    prices: Normal<f64>,
}

impl OrderGenerator {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            open: Vec::new(),
            prices: Normal::new(MEAN_PRICE, STD_DEV).expect("valid distribution"),
        }
    }

    pub fn next_event(&mut self) -> OrderEvent {
        let mut rng = thread_rng();
        if !self.open.is_empty() && rng.gen_ratio(1, 5) {
            let index = rng.gen_range(0..self.open.len());
            let order_id = self.open.swap_remove(index);
            return OrderCancelled {
                order_id,
                reason: Some("changed my mind".to_string()),
            }
            .into();
        }
        let order_id = format!("order-{}", self.next_id);
        self.next_id += 1;
        self.open.push(order_id.clone());
        OrderPlaced {
            order_id,
            customer: CUSTOMERS[rng.gen_range(0..CUSTOMERS.len())].to_string(),
            quantity: rng.gen_range(1..10),
            unit_price: self.prices.sample(&mut rng).max(1.0) as u32,
        }
        .into()
    }
}

impl Default for OrderGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Revenue per customer, built from the order stream.
#[derive(Debug, Default)]
pub struct RevenueProjection {
    orders: HashMap<String, (String, u64)>,
}

impl RevenueProjection {
    /// Applying the same event twice has no further effect.
    pub fn apply(&mut self, event: &OrderEvent) {
        match event {
            OrderEvent::Placed(placed) => {
                let total = u64::from(placed.quantity) * u64::from(placed.unit_price);
                self.orders
                    .insert(placed.order_id.clone(), (placed.customer.clone(), total));
            }
            OrderEvent::Cancelled(cancelled) => {
                self.orders.remove(&cancelled.order_id);
            }
        }
    }

    pub fn open_orders(&self) -> usize {
        self.orders.len()
    }
}

impl fmt::Display for RevenueProjection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut totals: HashMap<&str, u64> = HashMap::new();
        for (customer, total) in self.orders.values() {
            *totals.entry(customer.as_str()).or_default() += total;
        }
        let mut totals: Vec<_> = totals.into_iter().collect();
        totals.sort();
        for (customer, cents) in totals {
            write!(f, "{}: {}.{:02} ", customer, cents / 100, cents % 100)?;
        }
        Ok(())
    }
}
