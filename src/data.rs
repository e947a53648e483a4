use crate::error::Error;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use datafusion::arrow::array::{
    ArrayRef, Date64Builder, Float64Builder, RecordBatch, StringDictionaryBuilder, UInt64Builder,
};
use datafusion::arrow::datatypes::{DataType, Field, Int32Type, Schema};
use datafusion::common::JoinType;
use datafusion::prelude::{col, DataFrame, SessionContext};
use serde_json::Value;
use std::sync::Arc;

fn id_field(name: &str) -> Field {
    Field::new(
        name,
        DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8)),
        false,
    )
}

/// Video engagement counters reported per (date, ad_id). The API omits them
/// for non-video ads, so all of them are nullable.
pub const VIDEO_METRICS: [&str; 12] = [
    "video_started",
    "video_viewable_impressions",
    "video_fully_viewable_impressions",
    "video_plays_with_sound",
    "video_plays_expanded",
    "video_watched_3_seconds",
    "video_watched_10_seconds",
    "video_watched_25_percent",
    "video_watched_50_percent",
    "video_watched_75_percent",
    "video_watched_95_percent",
    "video_watched_100_percent",
];

/// Creates the schema for report rows, keyed by (date, ad_id).
pub fn report_schema() -> Arc<Schema> {
    let mut fields = vec![
        Field::new("date", DataType::Date64, false),
        id_field("ad_id"),
        Field::new("impressions", DataType::UInt64, false),
        Field::new("clicks", DataType::UInt64, false),
        Field::new("spend", DataType::UInt64, false),
        Field::new("ctr", DataType::Float64, true),
        Field::new("cpc", DataType::Float64, true),
        Field::new("ecpm", DataType::Float64, true),
    ];
    fields.extend(
        VIDEO_METRICS
            .iter()
            .map(|name| Field::new(*name, DataType::UInt64, true)),
    );

    Arc::new(Schema::new(fields))
}

pub fn ads_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        id_field("ad_id"),
        id_field("ad_group_id"),
        id_field("ad_name"),
    ]))
}

pub fn ad_groups_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        id_field("ad_group_id"),
        id_field("account_id"),
        id_field("campaign_id"),
        id_field("ad_group_name"),
    ]))
}

pub fn campaigns_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        id_field("campaign_id"),
        id_field("campaign_name"),
    ]))
}

fn get_str<'a>(
    record: &'a Value,
    resource: &'static str,
    field: &'static str,
) -> Result<&'a str, Error> {
    record
        .get(field)
        .and_then(Value::as_str)
        .ok_or(Error::BadField { resource, field })
}

fn get_u64(record: &Value, resource: &'static str, field: &'static str) -> Result<u64, Error> {
    record
        .get(field)
        .and_then(Value::as_u64)
        .ok_or(Error::BadField { resource, field })
}

fn get_u64_opt(
    record: &Value,
    resource: &'static str,
    field: &'static str,
) -> Result<Option<u64>, Error> {
    match record.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .ok_or(Error::BadField { resource, field }),
    }
}

fn get_f64_opt(
    record: &Value,
    resource: &'static str,
    field: &'static str,
) -> Result<Option<f64>, Error> {
    match record.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or(Error::BadField { resource, field }),
    }
}

/// Parses a plain date or an RFC 3339 timestamp (the reports endpoint
/// returns the latter) into milliseconds since the Unix epoch.
fn parse_date_as_unix_ms(date: &str) -> Result<i64, Error> {
    let parsed_date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(date).map(|ts| ts.date_naive()))
        .map_err(|_| Error::InvalidDate {
            date: date.to_string(),
        })?;
    let unix_duration = parsed_date - NaiveDateTime::UNIX_EPOCH.date();

    Ok(unix_duration.num_milliseconds())
}

/// Converts raw report records to a typed DataFrame, keeping only rows dated
/// on or after `start_date`.
///
/// # Arguments
/// * `records` - Raw report records as returned by the API
/// * `ctx` - A reference to the [`SessionContext`] for DataFrame operations
/// * `start_date` - Inclusive lower bound on the report date
///
/// # Returns
/// A Result containing either a [`DataFrame`] or an [`Error`]
pub fn transform_reports(
    records: &[Value],
    ctx: &SessionContext,
    start_date: NaiveDate,
) -> Result<DataFrame, Error> {
    let resource = "report";
    let start_ms = (start_date - NaiveDateTime::UNIX_EPOCH.date()).num_milliseconds();

    let num_records = records.len();
    let mut date_builder = Date64Builder::with_capacity(num_records);
    let mut ad_id_builder = StringDictionaryBuilder::<Int32Type>::new();
    let mut impressions_builder = UInt64Builder::with_capacity(num_records);
    let mut clicks_builder = UInt64Builder::with_capacity(num_records);
    let mut spend_builder = UInt64Builder::with_capacity(num_records);
    let mut ctr_builder = Float64Builder::with_capacity(num_records);
    let mut cpc_builder = Float64Builder::with_capacity(num_records);
    let mut ecpm_builder = Float64Builder::with_capacity(num_records);
    let mut video_builders: Vec<UInt64Builder> = VIDEO_METRICS
        .iter()
        .map(|_| UInt64Builder::with_capacity(num_records))
        .collect();

    for record in records {
        let date_ms = parse_date_as_unix_ms(get_str(record, resource, "date")?)?;
        if date_ms < start_ms {
            continue;
        }

        date_builder.append_value(date_ms);
        ad_id_builder.append_value(get_str(record, resource, "ad_id")?);
        impressions_builder.append_value(get_u64(record, resource, "impressions")?);
        clicks_builder.append_value(get_u64(record, resource, "clicks")?);
        spend_builder.append_value(get_u64(record, resource, "spend")?);
        ctr_builder.append_option(get_f64_opt(record, resource, "ctr")?);
        cpc_builder.append_option(get_f64_opt(record, resource, "cpc")?);
        ecpm_builder.append_option(get_f64_opt(record, resource, "ecpm")?);
        for (name, builder) in VIDEO_METRICS.iter().zip(video_builders.iter_mut()) {
            builder.append_option(get_u64_opt(record, resource, *name)?);
        }
    }

    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(date_builder.finish()),
        Arc::new(ad_id_builder.finish()),
        Arc::new(impressions_builder.finish()),
        Arc::new(clicks_builder.finish()),
        Arc::new(spend_builder.finish()),
        Arc::new(ctr_builder.finish()),
        Arc::new(cpc_builder.finish()),
        Arc::new(ecpm_builder.finish()),
    ];
    columns.extend(
        video_builders
            .into_iter()
            .map(|mut builder| Arc::new(builder.finish()) as ArrayRef),
    );

    let batch = RecordBatch::try_new(report_schema(), columns)?;

    Ok(ctx.read_batch(batch)?)
}

/// Converts raw ad records to a DataFrame with `id` renamed to `ad_id` and
/// `name` to `ad_name`.
pub fn transform_ads(records: &[Value], ctx: &SessionContext) -> Result<DataFrame, Error> {
    let resource = "ad";

    let mut ad_id_builder = StringDictionaryBuilder::<Int32Type>::new();
    let mut ad_group_id_builder = StringDictionaryBuilder::<Int32Type>::new();
    let mut ad_name_builder = StringDictionaryBuilder::<Int32Type>::new();

    for record in records {
        ad_id_builder.append_value(get_str(record, resource, "id")?);
        ad_group_id_builder.append_value(get_str(record, resource, "ad_group_id")?);
        ad_name_builder.append_value(get_str(record, resource, "name")?);
    }

    let batch = RecordBatch::try_new(
        ads_schema(),
        vec![
            Arc::new(ad_id_builder.finish()),
            Arc::new(ad_group_id_builder.finish()),
            Arc::new(ad_name_builder.finish()),
        ],
    )?;

    Ok(ctx.read_batch(batch)?)
}

/// Converts raw ad group records to a DataFrame with `id` renamed to
/// `ad_group_id` and `name` to `ad_group_name`.
pub fn transform_ad_groups(records: &[Value], ctx: &SessionContext) -> Result<DataFrame, Error> {
    let resource = "ad group";

    let mut ad_group_id_builder = StringDictionaryBuilder::<Int32Type>::new();
    let mut account_id_builder = StringDictionaryBuilder::<Int32Type>::new();
    let mut campaign_id_builder = StringDictionaryBuilder::<Int32Type>::new();
    let mut ad_group_name_builder = StringDictionaryBuilder::<Int32Type>::new();

    for record in records {
        ad_group_id_builder.append_value(get_str(record, resource, "id")?);
        account_id_builder.append_value(get_str(record, resource, "account_id")?);
        campaign_id_builder.append_value(get_str(record, resource, "campaign_id")?);
        ad_group_name_builder.append_value(get_str(record, resource, "name")?);
    }

    let batch = RecordBatch::try_new(
        ad_groups_schema(),
        vec![
            Arc::new(ad_group_id_builder.finish()),
            Arc::new(account_id_builder.finish()),
            Arc::new(campaign_id_builder.finish()),
            Arc::new(ad_group_name_builder.finish()),
        ],
    )?;

    Ok(ctx.read_batch(batch)?)
}

/// Converts raw campaign records to a DataFrame with `id` renamed to
/// `campaign_id` and `name` to `campaign_name`.
pub fn transform_campaigns(records: &[Value], ctx: &SessionContext) -> Result<DataFrame, Error> {
    let resource = "campaign";

    let mut campaign_id_builder = StringDictionaryBuilder::<Int32Type>::new();
    let mut campaign_name_builder = StringDictionaryBuilder::<Int32Type>::new();

    for record in records {
        campaign_id_builder.append_value(get_str(record, resource, "id")?);
        campaign_name_builder.append_value(get_str(record, resource, "name")?);
    }

    let batch = RecordBatch::try_new(
        campaigns_schema(),
        vec![
            Arc::new(campaign_id_builder.finish()),
            Arc::new(campaign_name_builder.finish()),
        ],
    )?;

    Ok(ctx.read_batch(batch)?)
}

///
/// Joins reports with ads, ad groups and campaigns into one denormalized
/// table, one row per (date, ad_id).
///
/// All three joins are inner joins: report rows whose keys do not resolve in
/// every dimension table are dropped rather than guessed at. Name collisions
/// are avoided up front because the transforms already renamed each `name`
/// column to `ad_name`, `ad_group_name` and `campaign_name`.
///
/// # Returns
/// A Result containing either the joined [`DataFrame`], sorted by date, or an
/// [`Error`]
pub async fn get_result(
    report_df: DataFrame,
    ads_df: DataFrame,
    ad_groups_df: DataFrame,
    campaigns_df: DataFrame,
) -> Result<DataFrame, Error> {
    let tmp_ad_id = "ads_ad_id";
    let tmp_ad_group_id = "grp_ad_group_id";
    let tmp_campaign_id = "cmp_campaign_id";

    let ads_df = ads_df.select(vec![
        col("ad_id").alias(tmp_ad_id),
        col("ad_group_id"),
        col("ad_name"),
    ])?;

    let df = report_df
        .join(ads_df, JoinType::Inner, &["ad_id"], &[tmp_ad_id], None)?
        .drop_columns(&[tmp_ad_id])?;

    let ad_groups_df = ad_groups_df.select(vec![
        col("ad_group_id").alias(tmp_ad_group_id),
        col("account_id"),
        col("campaign_id"),
        col("ad_group_name"),
    ])?;

    let df = df
        .join(
            ad_groups_df,
            JoinType::Inner,
            &["ad_group_id"],
            &[tmp_ad_group_id],
            None,
        )?
        .drop_columns(&[tmp_ad_group_id])?;

    let campaigns_df = campaigns_df.select(vec![
        col("campaign_id").alias(tmp_campaign_id),
        col("campaign_name"),
    ])?;

    let df = df
        .join(
            campaigns_df,
            JoinType::Inner,
            &["campaign_id"],
            &[tmp_campaign_id],
            None,
        )?
        .drop_columns(&[tmp_campaign_id])?;

    let mut output = vec![
        col("date"),
        col("account_id"),
        col("campaign_id"),
        col("campaign_name"),
        col("ad_group_id"),
        col("ad_group_name"),
        col("ad_id"),
        col("ad_name"),
        col("impressions"),
        col("clicks"),
        col("spend"),
        col("ctr"),
        col("cpc"),
        col("ecpm"),
    ];
    output.extend(VIDEO_METRICS.iter().map(|name| col(*name)));

    let result = df
        .select(output)?
        .sort(vec![col("date").sort(true, true)])?;

    Ok(result)
}
