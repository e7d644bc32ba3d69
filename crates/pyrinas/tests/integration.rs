//! End-to-end tests: compile realistic Pyrinas programs and check the
//! emitted C for the structural substrings a correct lowering must produce.
//! These assert on generated C text rather than invoking a C toolchain.

use pyrinas::{compile, CompileError, NoImports};

fn compile_ok(source: &str) -> String {
    compile(source, "test.pyr", &mut NoImports)
        .unwrap_or_else(|err| panic!("expected compilation to succeed, got: {err}"))
        .c_source
}

fn compile_err(source: &str) -> CompileError {
    compile(source, "test.pyr", &mut NoImports).expect_err("expected compilation to fail")
}

#[test]
fn functions_and_structs_combine() {
    let c = compile_ok(
        "class Point:\n\
         \x20   x: int\n\
         \x20   y: int\n\
         \n\
         def create_point(x_val: int, y_val: int) -> Point:\n\
         \x20   p: Point = Point()\n\
         \x20   p.x = x_val\n\
         \x20   p.y = y_val\n\
         \x20   return p\n\
         \n\
         def get_distance_squared(p1: Point, p2: Point) -> int:\n\
         \x20   dx: int = p1.x - p2.x\n\
         \x20   dy: int = p1.y - p2.y\n\
         \x20   return dx * dx + dy * dy\n\
         \n\
         def main():\n\
         \x20   origin: Point = create_point(0, 0)\n\
         \x20   point1: Point = create_point(3, 4)\n\
         \x20   print(point1.x)\n\
         \x20   dist_sq: int = get_distance_squared(origin, point1)\n\
         \x20   print(dist_sq)\n",
    );

    assert!(c.contains("struct Point"), "{c}");
    assert!(c.contains("struct Point create_point(int x_val, int y_val)"), "{c}");
    assert!(c.contains("p.x = x_val"), "{c}");
    assert!(c.contains("return p"), "{c}");
    assert!(c.contains("int main()"), "{c}");
    // main must be the last function emitted so every callee is already declared.
    let main_pos = c.find("int main()").unwrap();
    let create_point_pos = c.find("create_point(int").unwrap();
    assert!(create_point_pos < main_pos, "{c}");
}

#[test]
fn enum_members_are_name_prefixed_and_comparable() {
    let c = compile_ok(
        "class Color(Enum):\n\
         \x20   RED = 0\n\
         \x20   GREEN = 1\n\
         \x20   BLUE = 2\n\
         \n\
         def main():\n\
         \x20   current_color: Color = Color.RED\n\
         \x20   if current_color == Color.RED:\n\
         \x20       print(1)\n\
         \x20   print(int(current_color))\n",
    );

    assert!(c.contains("Color_RED = 0"), "{c}");
    assert!(c.contains("Color_GREEN = 1"), "{c}");
    assert!(c.contains("Color_BLUE = 2"), "{c}");
    assert!(c.contains("current_color == Color_RED"), "{c}");
}

#[test]
fn result_return_and_match_lower_to_tagged_union() {
    let c = compile_ok(
        "def divide(a: int, b: int) -> Result[int, str]:\n\
         \x20   if b == 0:\n\
         \x20       return Err(\"division by zero\")\n\
         \x20   return Ok(a // b)\n\
         \n\
         def main():\n\
         \x20   outcome: Result[int, str] = divide(10, 2)\n\
         \x20   match outcome:\n\
         \x20       case Ok(value):\n\
         \x20           print(value)\n\
         \x20       case Err(message):\n\
         \x20           print(message)\n",
    );

    assert!(c.contains("} tag;"), "{c}");
    assert!(c.contains("union {"), "{c}");
    assert!(c.contains("_ok("), "{c}");
    assert!(c.contains("_err("), "{c}");
    assert!(c.contains("_is_ok("), "{c}");
    assert!(c.contains("value.ok"), "{c}");
    assert!(c.contains("value.err"), "{c}");
}

#[test]
fn labeled_nested_loops_lower_to_goto() {
    let c = compile_ok(
        "def nested_loops_with_break(limit: int) -> int:\n\
         \x20   total: int = 0\n\
         \x20   i: int = 0\n\
         \x20   \"outer\"\n\
         \x20   while i < limit:\n\
         \x20       j: int = 0\n\
         \x20       while j < limit:\n\
         \x20           if i + j > 5:\n\
         \x20               \"outer\"\n\
         \x20               break\n\
         \x20           total = total + 1\n\
         \x20           j = j + 1\n\
         \x20       i = i + 1\n\
         \x20   return total\n\
         \n\
         def main():\n\
         \x20   total: int = nested_loops_with_break(4)\n\
         \x20   print(total)\n",
    );

    assert!(c.contains("outer:"), "{c}");
    assert!(c.contains("goto outer_break;"), "{c}");
    assert!(c.contains("outer_break:;"), "{c}");
}

#[test]
fn pointers_and_structs_with_recursive_field() {
    let c = compile_ok(
        "class Node:\n\
         \x20   value: int\n\
         \x20   next: 'ptr[Node]'\n\
         \n\
         def main():\n\
         \x20   node1: Node = Node()\n\
         \x20   node2: Node = Node()\n\
         \x20   node1.value = 42\n\
         \x20   node1.next = addr(node2)\n\
         \x20   print(node1.value)\n\
         \x20   next_node: Node = deref(node1.next)\n\
         \x20   print(next_node.value)\n",
    );

    assert!(c.contains("struct Node* next;"), "{c}");
    assert!(c.contains("&node2"), "{c}");
    assert!(c.contains("*node1.next"), "{c}");
}

#[test]
fn pointer_functions_assign_and_deref() {
    let c = compile_ok(
        "def modify_value_by_pointer(ptr: 'ptr[int]', new_value: int):\n\
         \x20   assign(ptr, new_value)\n\
         \n\
         def main():\n\
         \x20   a: int = 42\n\
         \x20   a_ptr: 'ptr[int]' = addr(a)\n\
         \x20   modify_value_by_pointer(a_ptr, 50)\n\
         \x20   print(a)\n",
    );

    assert!(c.contains("void modify_value_by_pointer(int* ptr, int new_value)"), "{c}");
    assert!(c.contains("*ptr = new_value"), "{c}");
}

#[test]
fn arrays_as_function_parameters_decay_to_pointers() {
    let c = compile_ok(
        "def sum_array(arr: 'array[int, 5]') -> int:\n\
         \x20   total: int = 0\n\
         \x20   i: int = 0\n\
         \x20   while i < 5:\n\
         \x20       total = total + arr[i]\n\
         \x20       i = i + 1\n\
         \x20   return total\n\
         \n\
         def main():\n\
         \x20   numbers: 'array[int, 5]'\n\
         \x20   numbers[0] = 10\n\
         \x20   total: int = sum_array(numbers)\n\
         \x20   print(total)\n",
    );

    assert!(c.contains("int sum_array(int* arr)"), "{c}");
    assert!(c.contains("int numbers[5];"), "{c}");
}

#[test]
fn recursion_and_void_return_type_compile() {
    let c = compile_ok(
        "def factorial(n: int) -> int:\n\
         \x20   if n <= 1:\n\
         \x20       return 1\n\
         \x20   else:\n\
         \x20       return n * factorial(n - 1)\n\
         \n\
         def countdown(n: int) -> None:\n\
         \x20   if n > 0:\n\
         \x20       print(n)\n\
         \x20       countdown(n - 1)\n\
         \n\
         def main():\n\
         \x20   fact5: int = factorial(5)\n\
         \x20   print(fact5)\n\
         \x20   countdown(3)\n",
    );

    assert!(c.contains("int factorial(int n)"), "{c}");
    assert!(c.contains("void countdown(int n)"), "{c}");
    assert!(c.contains("factorial(n - 1)"), "{c}");
}

#[test]
fn interfaces_are_satisfied_by_structs_implementing_their_methods() {
    let c = compile_ok(
        "class Drawable:\n\
         \x20   def draw(self) -> None:\n\
         \x20       pass\n\
         \x20   def get_area(self) -> float:\n\
         \x20       pass\n\
         \n\
         class Rectangle(Drawable):\n\
         \x20   width: float\n\
         \x20   height: float\n\
         \x20   def draw(self) -> None:\n\
         \x20       print(1)\n\
         \x20   def get_area(self) -> float:\n\
         \x20       return self.width * self.height\n\
         \n\
         def main():\n\
         \x20   r: Rectangle = Rectangle()\n\
         \x20   r.width = 3.0\n\
         \x20   r.height = 4.0\n\
         \x20   area: float = r.get_area()\n\
         \x20   print(area)\n",
    );

    assert!(c.contains("struct Rectangle"), "{c}");
    assert!(c.contains("Rectangle_get_area"), "{c}");
    assert!(c.contains("Rectangle_get_area(&r)"), "{c}");
}

#[test]
fn immutable_final_declaration_compiles() {
    let c = compile_ok(
        "def main():\n\
         \x20   x: int = 5\n\
         \x20   print(x)\n\
         \x20   x = 10\n\
         \x20   y: Final[int] = 42\n\
         \x20   print(y)\n",
    );

    assert!(c.contains("int y = 42;"), "{c}");
}

#[test]
fn malloc_free_and_sizeof_lower_without_extra_casts() {
    let c = compile_ok(
        "def main():\n\
         \x20   p: 'ptr[int]' = malloc(sizeof(\"int\"))\n\
         \x20   free(p)\n",
    );

    assert!(c.contains("malloc(sizeof(int))"), "{c}");
    assert!(c.contains("free(p)"), "{c}");
}

// --- Rejection laws (§4.3): one minimal violation per rule. ---

#[test]
fn reassigning_a_final_binding_is_rejected() {
    compile_err(
        "def main():\n\
         \x20   y: Final[int] = 42\n\
         \x20   y = 50\n",
    );
}

#[test]
fn break_outside_a_loop_is_rejected() {
    compile_err("def main():\n    break\n");
}

#[test]
fn mismatched_labeled_break_is_rejected() {
    compile_err(
        "def main():\n\
         \x20   while True:\n\
         \x20       \"missing\"\n\
         \x20       break\n",
    );
}

#[test]
fn match_on_result_missing_err_arm_is_rejected() {
    compile_err(
        "def divide(a: int, b: int) -> Result[int, str]:\n\
         \x20   return Ok(a)\n\
         \n\
         def main():\n\
         \x20   outcome: Result[int, str] = divide(1, 2)\n\
         \x20   match outcome:\n\
         \x20       case Ok(value):\n\
         \x20           print(value)\n",
    );
}

#[test]
fn arithmetic_between_incompatible_types_is_rejected() {
    compile_err(
        "def main():\n\
         \x20   a: int = 1\n\
         \x20   b: str = \"x\"\n\
         \x20   c: int = a + b\n",
    );
}

#[test]
fn if_condition_must_be_bool() {
    compile_err(
        "def main():\n\
         \x20   x: int = 1\n\
         \x20   if x:\n\
         \x20       print(1)\n",
    );
}

#[test]
fn duplicate_top_level_names_are_rejected() {
    compile_err(
        "def main():\n\
         \x20   print(1)\n\
         \n\
         def main():\n\
         \x20   print(2)\n",
    );
}

#[test]
fn return_type_mismatch_is_rejected() {
    compile_err(
        "def give_one() -> int:\n\
         \x20   return \"not an int\"\n\
         \n\
         def main():\n\
         \x20   print(give_one())\n",
    );
}

#[test]
fn executable_module_without_main_is_rejected() {
    compile_err("def helper() -> int:\n    return 1\n");
}
