use crate::query::{
    ast::insert::Insert,
    dialect::Dialect,
    renderer::{Render, Renderer},
};

impl Render for Insert {
    fn render<D: Dialect + ?Sized>(&self, r: &mut Renderer<'_, D>) {
        // 1. INSERT INTO table (...)
        r.sql.push_str("INSERT INTO ");
        r.render_table_ref(&self.table);
        r.sql.push_str(" (");
        let quoted: Vec<String> = self
            .columns
            .iter()
            .map(|c| r.dialect.quote_identifier(c))
            .collect();
        r.sql.push_str(&quoted.join(", "));
        r.sql.push(')');

        // 2. VALUES (...), (...)
        r.sql.push_str(" VALUES ");
        for row in 0..self.rows {
            if row > 0 {
                r.sql.push_str(", ");
            }
            r.sql.push('(');
            for col in 0..self.columns.len() {
                if col > 0 {
                    r.sql.push_str(", ");
                }
                r.add_placeholder();
            }
            r.sql.push(')');
        }

        // 3. Dialect specific conflict handling
        if let Some(on_conflict) = &self.on_conflict {
            let clause = r.dialect.upsert_clause(on_conflict);
            if !clause.is_empty() {
                r.sql.push(' ');
                r.sql.push_str(&clause);
            }
        }
    }
}
