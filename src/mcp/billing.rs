//! 账单/光伏测算工具（TNB 电费表）
//!
//! 三个工具共享一份 bill.json 档位表：RM→kWh、kWh→RM 最近档位查表，
//! 以及 calculate_solar_impact 光伏收益测算。工具是纯函数，结果文本
//! 原样交还编排器，不触碰任何存储。

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::mcp::{ArgKind, ArgumentSchema, McpTool};

/// 620W 面板的额定出力（kW）
const PANEL_RATING_KW: f64 = 0.62;
/// 上网电价（RM/kWh）
const EXPORT_TARIFF_RM: f64 = 0.20;
/// 早间用电占比默认值（%）
const DEFAULT_MORNING_USAGE_PCT: f64 = 30.0;
/// 日照峰值小时默认值
const DEFAULT_SUNPEAK_HOUR: f64 = 3.4;

/// 单条档位记录：月用电量与对应电费
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct BillRecord {
    pub kwh: f64,
    pub bill: f64,
}

/// 档位表：按 kwh 升序，支持按电费/用电量找最近档位
#[derive(Debug)]
pub struct BillTable {
    records: Vec<BillRecord>,
    min_kwh: f64,
    max_kwh: f64,
    min_bill: f64,
    max_bill: f64,
}

impl BillTable {
    pub fn from_records(mut records: Vec<BillRecord>) -> Result<Self, String> {
        if records.is_empty() {
            return Err("bill table is empty".to_string());
        }
        records.sort_by(|a, b| a.kwh.total_cmp(&b.kwh));
        let min_kwh = records.first().map(|r| r.kwh).unwrap_or_default();
        let max_kwh = records.last().map(|r| r.kwh).unwrap_or_default();
        let min_bill = records.iter().map(|r| r.bill).fold(f64::INFINITY, f64::min);
        let max_bill = records
            .iter()
            .map(|r| r.bill)
            .fold(f64::NEG_INFINITY, f64::max);
        Ok(Self {
            records,
            min_kwh,
            max_kwh,
            min_bill,
            max_bill,
        })
    }

    /// 从 JSON 文件加载（[{"kwh": .., "bill": ..}, ...]）
    pub fn load(path: impl AsRef<Path>) -> Result<Self, String> {
        let data = std::fs::read_to_string(path.as_ref())
            .map_err(|e| format!("read {}: {}", path.as_ref().display(), e))?;
        let records: Vec<BillRecord> =
            serde_json::from_str(&data).map_err(|e| format!("parse bill table: {}", e))?;
        Self::from_records(records)
    }

    /// 按电费找最近档位；超出表范围返回 None
    pub fn nearest_by_bill(&self, rm: f64) -> Option<&BillRecord> {
        if rm < self.min_bill || rm > self.max_bill {
            return None;
        }
        self.records
            .iter()
            .min_by(|a, b| (a.bill - rm).abs().total_cmp(&(b.bill - rm).abs()))
    }

    /// 按用电量找最近档位；低于下限按最小档位计，超出上限返回 None
    pub fn nearest_by_kwh(&self, kwh: f64) -> Option<&BillRecord> {
        if kwh < self.min_kwh {
            return self.records.first();
        }
        if kwh > self.max_kwh {
            return None;
        }
        self.records
            .iter()
            .min_by(|a, b| (a.kwh - kwh).abs().total_cmp(&(b.kwh - kwh).abs()))
    }

    fn out_of_scope_msg(&self) -> String {
        format!(
            "out_of_scope: value outside bill table range (kWh {}–{}, RM {}–{})",
            self.min_kwh, self.max_kwh, self.min_bill, self.max_bill
        )
    }
}

/// RM → kWh 查表工具
pub struct BillRmToKwhTool {
    table: Arc<BillTable>,
}

impl BillRmToKwhTool {
    pub fn new(table: Arc<BillTable>) -> Self {
        Self { table }
    }
}

#[async_trait]
impl McpTool for BillRmToKwhTool {
    fn name(&self) -> &str {
        "tnb_bill_rm_to_kwh"
    }

    fn description(&self) -> &str {
        "Convert RM amount to the nearest kWh usage using the TNB tariff table"
    }

    fn schema(&self) -> ArgumentSchema {
        ArgumentSchema::new().required("rm", ArgKind::Number, "Bill amount in RM")
    }

    async fn call(&self, args: Value) -> Result<String, String> {
        let rm = number_arg(&args, "rm")?;
        match self.table.nearest_by_bill(rm) {
            Some(record) => Ok(format!(
                "RM {:.2} maps to {} kWh (nearest bill entry RM {:.2})",
                rm, record.kwh, record.bill
            )),
            None => Ok(self.table.out_of_scope_msg()),
        }
    }
}

/// kWh → RM 查表工具
pub struct BillKwhToRmTool {
    table: Arc<BillTable>,
}

impl BillKwhToRmTool {
    pub fn new(table: Arc<BillTable>) -> Self {
        Self { table }
    }
}

#[async_trait]
impl McpTool for BillKwhToRmTool {
    fn name(&self) -> &str {
        "tnb_bill_kwh_to_rm"
    }

    fn description(&self) -> &str {
        "Convert kWh usage to RM using the TNB tariff table"
    }

    fn schema(&self) -> ArgumentSchema {
        ArgumentSchema::new().required("kwh", ArgKind::Number, "Usage in kWh")
    }

    async fn call(&self, args: Value) -> Result<String, String> {
        let kwh = number_arg(&args, "kwh")?;
        match self.table.nearest_by_kwh(kwh) {
            Some(record) => Ok(format!(
                "{} kWh maps to RM {:.2} (nearest to requested {} kWh)",
                record.kwh, record.bill, kwh
            )),
            None => Ok(self.table.out_of_scope_msg()),
        }
    }
}

/// 光伏收益测算工具：月电费 + 用电模式参数 → 系统规模、节省额与新应缴额
pub struct SolarImpactTool {
    table: Arc<BillTable>,
}

impl SolarImpactTool {
    pub fn new(table: Arc<BillTable>) -> Self {
        Self { table }
    }

    fn format_impact(&self, input_rm: f64, morning_usage_pct: f64, sunpeak_hour: f64) -> String {
        let morning_ratio = morning_usage_pct.clamp(0.0, 100.0) / 100.0;

        let record = match self.table.nearest_by_bill(input_rm) {
            Some(r) => r,
            None => return self.table.out_of_scope_msg(),
        };

        let total_usage = record.kwh;
        let panel_qty = total_usage / 30.0 / sunpeak_hour / PANEL_RATING_KW;

        let after_solar_usage = total_usage * (1.0 - morning_ratio);
        let after_solar_record = match self.table.nearest_by_kwh(after_solar_usage) {
            Some(r) => r,
            None => {
                return format!(
                    "Error: Calculated after-solar usage {:.2} kWh is out of tariff table range.",
                    after_solar_usage
                )
            }
        };

        let after_solar_rm = after_solar_record.bill;
        let bill_reduction_rm = input_rm - after_solar_rm;

        let total_solar_generation_monthly = PANEL_RATING_KW * sunpeak_hour * panel_qty * 30.0;

        let consumed_solar = total_usage * morning_ratio;
        let export_generation = total_solar_generation_monthly - consumed_solar;
        let export_income = export_generation * EXPORT_TARIFF_RM;

        let total_saving = export_income + bill_reduction_rm;
        let new_payable = input_rm - total_saving;

        format!(
            "[OFFICIAL MCP CALCULATION RESULT]\n\
             *** DO NOT RECALCULATE. USE THESE EXACT FIGURES. ***\n\
             \n\
             Based on Malaysia TNB Tariff (bill table lookup):\n\
             - Input Bill: RM {input_rm:.2}\n\
             - Matched Usage: {total_usage:.2} kWh (derived from official tariff table)\n\
             \n\
             Solar System Sizing (Targeting ~100% Offset):\n\
             - Required System Size: {system_kwp:.2} kWp\n\
             - Number of Panels (620W): {panels} panels (Calculated: {panel_qty:.2})\n\
             - Generation Factor: {sunpeak_hour} peak hours/day\n\
             \n\
             Financial Analysis (Estimated):\n\
             - Total Solar Generation: {total_solar_generation_monthly:.2} kWh/month\n\
             - Self-Consumption ({morning_usage_pct}%): {consumed_solar:.2} kWh\n\
             - Grid Export: {export_generation:.2} kWh\n\
             \n\
             SAVINGS BREAKDOWN:\n\
             1. Bill Reduction: RM {bill_reduction_rm:.2}\n\
             \x20  (New Bill Charge: RM {after_solar_rm:.2})\n\
             2. Export Income: RM {export_income:.2} (@ RM {EXPORT_TARIFF_RM:.2}/kWh)\n\
             --------------------------------------------------\n\
             TOTAL MONTHLY SAVINGS: RM {total_saving:.2}\n\
             NEW NET PAYABLE: RM {new_payable:.2}\n\
             --------------------------------------------------\n\
             \n\
             (Note to Agent: Provide these EXACT numbers to the user. Do not estimate based on other data sources.)",
            system_kwp = panel_qty * PANEL_RATING_KW,
            panels = (panel_qty + 0.99) as i64,
        )
    }
}

#[async_trait]
impl McpTool for SolarImpactTool {
    fn name(&self) -> &str {
        "calculate_solar_impact"
    }

    fn description(&self) -> &str {
        "Calculate solar savings, new payable, and system details based on monthly bill."
    }

    fn schema(&self) -> ArgumentSchema {
        ArgumentSchema::new()
            .required("rm", ArgKind::Number, "Monthly TNB Bill in RM")
            .optional(
                "morning_usage_percentage",
                ArgKind::Number,
                "Percentage of usage in morning (default 30)",
                json!(DEFAULT_MORNING_USAGE_PCT),
            )
            .optional(
                "sunpeak_hour",
                ArgKind::Number,
                "Sun peak hours (default 3.4)",
                json!(DEFAULT_SUNPEAK_HOUR),
            )
    }

    async fn call(&self, args: Value) -> Result<String, String> {
        let rm = number_arg(&args, "rm")?;
        let morning = args
            .get("morning_usage_percentage")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_MORNING_USAGE_PCT);
        let sunpeak = args
            .get("sunpeak_hour")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_SUNPEAK_HOUR);
        Ok(self.format_impact(rm, morning, sunpeak))
    }
}

fn number_arg(args: &Value, name: &str) -> Result<f64, String> {
    args.get(name)
        .and_then(Value::as_f64)
        .ok_or_else(|| format!("missing numeric argument '{name}'"))
}
