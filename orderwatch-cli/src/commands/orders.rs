//! `orderwatch orders`: the current snapshot as a table.

use anyhow::{Context, Result};
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

use orderwatch_core::Order;
use orderwatch_daemon::request_orders;

#[derive(Args, Debug)]
pub struct OrdersArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct OrderRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "owner")]
    owner: String,
    #[tabled(rename = "created")]
    created: String,
}

impl From<&Order> for OrderRow {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id.to_string(),
            status: order.status.clone().unwrap_or_else(|| "-".to_string()),
            owner: order
                .owner
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "-".to_string()),
            created: order
                .created_at
                .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

impl OrdersArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let data = request_orders(&home).context("failed to fetch orders from orderwatch")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&data).context("failed to render orders JSON")?
            );
            return Ok(());
        }

        let orders: Vec<Order> =
            serde_json::from_value(data).context("daemon returned malformed orders")?;
        if orders.is_empty() {
            println!("No orders.");
            return Ok(());
        }

        let rows: Vec<OrderRow> = orders.iter().map(OrderRow::from).collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        println!("{} order(s)", orders.len());
        Ok(())
    }
}
