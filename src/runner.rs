use crate::api_client::AdsApi;
use crate::data;
use crate::error::Error;
use crate::warehouse::Warehouse;
use chrono::NaiveDate;
use datafusion::prelude::SessionContext;
use log::info;

/// Runs one full sync: fetch the four resources sequentially, transform and
/// join them, then replace the warehouse table with the result.
pub async fn sync_ads_data<A, W>(api: &A, warehouse: &W, start_date: NaiveDate) -> Result<(), Error>
where
    A: AdsApi + ?Sized,
    W: Warehouse + ?Sized,
{
    info!("Fetching data from API. Start date: {}", start_date);
    let reports = api.get_reports(start_date).await?;
    let ads = api.get_ads().await?;
    let ad_groups = api.get_ad_groups().await?;
    let campaigns = api.get_campaigns().await?;
    info!(
        "Fetched {} report rows, {} ads, {} ad groups, {} campaigns",
        reports.len(),
        ads.len(),
        ad_groups.len(),
        campaigns.len()
    );

    let ctx = SessionContext::new();
    let report_df = data::transform_reports(&reports, &ctx, start_date)?;
    let ads_df = data::transform_ads(&ads, &ctx)?;
    let ad_groups_df = data::transform_ad_groups(&ad_groups, &ctx)?;
    let campaigns_df = data::transform_campaigns(&campaigns, &ctx)?;

    let result = data::get_result(report_df, ads_df, ad_groups_df, campaigns_df).await?;
    let batches = result.collect().await?;

    let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
    if rows == 0 {
        return Err(Error::NoData {
            message: "Joined result is empty, nothing to load".to_string(),
        });
    }

    info!("Uploading {} rows to the warehouse", rows);
    warehouse.save_table(&batches).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_client::MockAdsApi;
    use crate::warehouse::MockWarehouse;
    use reqwest::StatusCode;
    use serde_json::{json, Value};

    fn report_records() -> Vec<Value> {
        vec![
            json!({
                "date": "2024-01-01T00:00:00Z",
                "ad_id": "ad1",
                "impressions": 1000,
                "clicks": 100,
                "spend": 5000,
                "ctr": 0.1,
                "cpc": 50.0,
                "ecpm": 5.0,
            }),
            json!({
                "date": "2024-01-02T00:00:00Z",
                "ad_id": "ad2",
                "impressions": 2000,
                "clicks": 200,
                "spend": 9000,
                "ctr": 0.1,
                "cpc": 45.0,
                "ecpm": 4.5,
            }),
        ]
    }

    fn ad_records() -> Vec<Value> {
        vec![
            json!({"id": "ad1", "ad_group_id": "g1", "name": "ad one"}),
            json!({"id": "ad2", "ad_group_id": "g1", "name": "ad two"}),
        ]
    }

    fn ad_group_records() -> Vec<Value> {
        vec![json!({
            "id": "g1",
            "account_id": "t2_acct",
            "campaign_id": "c1",
            "name": "group one",
        })]
    }

    fn campaign_records() -> Vec<Value> {
        vec![json!({"id": "c1", "name": "campaign one"})]
    }

    fn mock_api(reports: Vec<Value>, ads: Vec<Value>) -> MockAdsApi {
        let mut api = MockAdsApi::new();
        api.expect_get_reports()
            .returning(move |_| Ok(reports.clone()));
        api.expect_get_ads().returning(move || Ok(ads.clone()));
        api.expect_get_ad_groups()
            .returning(|| Ok(ad_group_records()));
        api.expect_get_campaigns()
            .returning(|| Ok(campaign_records()));
        api
    }

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[tokio::test]
    async fn test_sync_uploads_joined_rows() {
        let api = mock_api(report_records(), ad_records());

        let mut warehouse = MockWarehouse::new();
        warehouse
            .expect_save_table()
            .withf(|batches| batches.iter().map(|b| b.num_rows()).sum::<usize>() == 2)
            .once()
            .returning(|_| Ok(()));

        sync_ads_data(&api, &warehouse, start()).await.unwrap();
    }

    #[tokio::test]
    async fn test_sync_with_no_matching_ads_writes_nothing() {
        // Reports reference ad1/ad2 but the only ad is ad9, so the inner
        // join produces zero rows.
        let ads = vec![json!({"id": "ad9", "ad_group_id": "g1", "name": "ad nine"})];
        let api = mock_api(report_records(), ads);

        let mut warehouse = MockWarehouse::new();
        warehouse.expect_save_table().never();

        let result = sync_ads_data(&api, &warehouse, start()).await;
        assert!(matches!(result.unwrap_err(), Error::NoData { .. }));
    }

    #[tokio::test]
    async fn test_sync_aborts_on_upstream_server_error() {
        let mut api = MockAdsApi::new();
        api.expect_get_reports().returning(|_| {
            Err(Error::UnexpectedStatus {
                endpoint: "reports".to_string(),
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: "upstream exploded".to_string(),
            })
        });
        api.expect_get_ads().never();
        api.expect_get_ad_groups().never();
        api.expect_get_campaigns().never();

        let mut warehouse = MockWarehouse::new();
        warehouse.expect_save_table().never();

        let result = sync_ads_data(&api, &warehouse, start()).await;
        assert!(matches!(
            result.unwrap_err(),
            Error::UnexpectedStatus { status, .. } if status == StatusCode::INTERNAL_SERVER_ERROR
        ));
    }

    #[tokio::test]
    async fn test_sync_propagates_warehouse_failure() {
        let api = mock_api(report_records(), ad_records());

        let mut warehouse = MockWarehouse::new();
        warehouse.expect_save_table().once().returning(|_| {
            Err(Error::WarehouseWrite {
                message: "insert rejected".to_string(),
            })
        });

        let result = sync_ads_data(&api, &warehouse, start()).await;
        assert!(matches!(result.unwrap_err(), Error::WarehouseWrite { .. }));
    }
}
