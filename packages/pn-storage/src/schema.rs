const TABLE_PLACEHOLDER: &str = "<TABLE>";

pub fn render_schema(table: &str) -> String {
	include_str!("../../../sql/tables/001_notification_delegation_metadata.sql")
		.replace(TABLE_PLACEHOLDER, table)
}

#[cfg(test)]
mod tests {
	use super::render_schema;

	#[test]
	fn schema_uses_configured_table_name() {
		let sql = render_schema("delegation_rows");

		assert!(sql.contains("CREATE TABLE IF NOT EXISTS delegation_rows ("));
		assert!(sql.contains("delegation_rows_delegate_id_group_id_idx"));
		assert!(!sql.contains("<TABLE>"));
	}
}
