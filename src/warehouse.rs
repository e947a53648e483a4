use crate::error::Error;
use chrono::DateTime;
use datafusion::arrow::array::{
    Array, Date64Array, Float64Array, RecordBatch, StringArray, UInt64Array,
};
use datafusion::arrow::compute::{cast_with_options, CastOptions};
use datafusion::arrow::datatypes::{DataType, Schema};
use gcp_bigquery_client::client_builder::ClientBuilder;
use gcp_bigquery_client::model::query_request::QueryRequest;
use gcp_bigquery_client::model::table_data_insert_all_request::TableDataInsertAllRequest;
use gcp_bigquery_client::Client;
use log::info;
use serde_json::{Map, Value};

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Warehouse: Send + Sync + 'static {
    /// Writes the result table to the destination, replacing the target
    /// table so each run's output is authoritative.
    ///
    /// # Arguments
    /// * `batches` - The collected result table; the destination schema is
    ///   derived from the first batch.
    ///
    /// # Returns
    /// A Result containing either `()` or an Error.
    async fn save_table(&self, batches: &[RecordBatch]) -> Result<(), Error>;
}

pub struct BigQueryWarehouse {
    client: Client,
    project_id: String,
    dataset: String,
    table: String,
}

impl BigQueryWarehouse {
    /// Connects using Application Default Credentials resolved from the
    /// environment.
    pub async fn connect(project_id: &str, dataset: &str, table: &str) -> Result<Self, Error> {
        let client = ClientBuilder::new()
            .build_from_application_default_credentials()
            .await?;

        Ok(BigQueryWarehouse {
            client,
            project_id: project_id.to_string(),
            dataset: dataset.to_string(),
            table: table.to_string(),
        })
    }

    fn full_table_name(&self) -> String {
        format!("`{}.{}.{}`", self.project_id, self.dataset, self.table)
    }
}

#[async_trait::async_trait]
impl Warehouse for BigQueryWarehouse {
    async fn save_table(&self, batches: &[RecordBatch]) -> Result<(), Error> {
        let schema = batches.first().map(|b| b.schema()).ok_or(Error::NoData {
            message: "No rows to load into the warehouse".to_string(),
        })?;

        let full_table_name = self.full_table_name();
        let query = format!(
            "create or replace table {} {}",
            full_table_name,
            columns_spec(&schema)?
        );
        let _ = self
            .client
            .job()
            .query(&self.project_id, QueryRequest::new(query))
            .await?;

        let mut request = TableDataInsertAllRequest::new();
        let mut total_rows = 0;
        for batch in batches {
            for row in batch_to_rows(batch)? {
                request.add_row(None, row)?;
                total_rows += 1;
            }
        }

        let response = self
            .client
            .tabledata()
            .insert_all(&self.project_id, &self.dataset, &self.table, request)
            .await?;

        if let Some(errors) = response.insert_errors {
            if !errors.is_empty() {
                return Err(Error::WarehouseWrite {
                    message: format!("{} rows were rejected by {}", errors.len(), full_table_name),
                });
            }
        }

        info!("Loaded {} rows into {}", total_rows, full_table_name);

        Ok(())
    }
}

/// Maps the result's Arrow schema to a BigQuery column specification.
fn columns_spec(schema: &Schema) -> Result<String, Error> {
    let mut columns = Vec::with_capacity(schema.fields().len());

    for field in schema.fields() {
        let bq_type = match field.data_type() {
            DataType::Utf8 | DataType::Dictionary(_, _) => "string",
            DataType::UInt64 | DataType::Int64 => "int64",
            DataType::Float64 => "float64",
            DataType::Date64 => "date",
            other => {
                return Err(Error::UnsupportedColumn {
                    column: field.name().clone(),
                    data_type: other.to_string(),
                })
            }
        };
        columns.push(format!("{} {}", field.name(), bq_type));
    }

    Ok(format!("({})", columns.join(", ")))
}

/// Flattens a RecordBatch into one JSON object per row for the insert
/// request. Date columns are serialized as `YYYY-MM-DD`.
fn batch_to_rows(batch: &RecordBatch) -> Result<Vec<Map<String, Value>>, Error> {
    let mut rows = vec![Map::new(); batch.num_rows()];
    let schema = batch.schema();

    for (idx, field) in schema.fields().iter().enumerate() {
        let column = batch.column(idx);
        let name = field.name();

        let unsupported = || Error::UnsupportedColumn {
            column: name.clone(),
            data_type: field.data_type().to_string(),
        };

        match field.data_type() {
            DataType::Utf8 | DataType::Dictionary(_, _) => {
                let utf8 =
                    cast_with_options(column.as_ref(), &DataType::Utf8, &CastOptions::default())?;
                let values = utf8
                    .as_any()
                    .downcast_ref::<StringArray>()
                    .ok_or_else(unsupported)?;
                for (i, row) in rows.iter_mut().enumerate() {
                    row.insert(name.clone(), cell(values, i, |v, i| v.value(i).into()));
                }
            }
            DataType::UInt64 => {
                let values = column
                    .as_any()
                    .downcast_ref::<UInt64Array>()
                    .ok_or_else(unsupported)?;
                for (i, row) in rows.iter_mut().enumerate() {
                    row.insert(name.clone(), cell(values, i, |v, i| v.value(i).into()));
                }
            }
            DataType::Float64 => {
                let values = column
                    .as_any()
                    .downcast_ref::<Float64Array>()
                    .ok_or_else(unsupported)?;
                for (i, row) in rows.iter_mut().enumerate() {
                    row.insert(name.clone(), cell(values, i, |v, i| v.value(i).into()));
                }
            }
            DataType::Date64 => {
                let values = column
                    .as_any()
                    .downcast_ref::<Date64Array>()
                    .ok_or_else(unsupported)?;
                for (i, row) in rows.iter_mut().enumerate() {
                    let value = if values.is_valid(i) {
                        format_date(values.value(i))?.into()
                    } else {
                        Value::Null
                    };
                    row.insert(name.clone(), value);
                }
            }
            _ => return Err(unsupported()),
        }
    }

    Ok(rows)
}

fn cell<A: Array>(values: &A, i: usize, to_value: impl Fn(&A, usize) -> Value) -> Value {
    if values.is_valid(i) {
        to_value(values, i)
    } else {
        Value::Null
    }
}

fn format_date(unix_ms: i64) -> Result<String, Error> {
    let date = DateTime::from_timestamp_millis(unix_ms).ok_or(Error::InvalidDate {
        date: unix_ms.to_string(),
    })?;

    Ok(date.date_naive().format("%Y-%m-%d").to_string())
}
